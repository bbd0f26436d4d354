//! Assembles a pipeline's collaborators, queue sizing, and policy flags
//! into one immutable [`PipelineConfig`], built via [`PipelineConfigBuilder`].

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{DecoderRegistry, Encoder, PassthroughEncoder, PreviewPolicy};
use crate::data_loader::DataLoader;
use crate::disk_cache::DataCache;
use crate::keys::DataCachePolicy;
use crate::memory_cache::MemoryCache;
use crate::rate_limiter::{DEFAULT_BURST, DEFAULT_RATE};

pub const DEFAULT_MAX_CONCURRENT_DATA_LOADS: usize = 6;
pub const DEFAULT_MAX_CONCURRENT_DECODES: usize = 1;
pub const DEFAULT_MAX_CONCURRENT_PROCESSORS: usize = 2;
pub const DEFAULT_MAX_CONCURRENT_ENCODES: usize = 1;
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Which tiers of bytes a configured disk cache actually persists. Distinct
/// from `disk_cache_policy`, which only governs how a stored entry's key is
/// derived once a write is allowed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskCacheMode {
    /// Never write to the disk cache, even if one is configured.
    None,
    /// Write only the raw, undecoded bytes a data fetch produced.
    Originals,
    /// Write only a processed pipeline's encoded output.
    Processed,
    /// Write both originals and processed bytes.
    All,
}

impl DiskCacheMode {
    pub fn allows_originals(self) -> bool {
        matches!(self, DiskCacheMode::Originals | DiskCacheMode::All)
    }

    pub fn allows_processed(self) -> bool {
        matches!(self, DiskCacheMode::Processed | DiskCacheMode::All)
    }
}

/// Policy knobs that aren't tied to a specific collaborator.
#[derive(Debug, Clone, Copy)]
pub struct PolicyFlags {
    pub is_progressive_decoding_enabled: bool,
    pub is_resumable_data_enabled: bool,
    pub is_rate_limiter_enabled: bool,
    pub is_decompression_enabled: bool,
    pub preview_policy: PreviewPolicy,
    pub disk_cache_policy: DataCachePolicy,
    pub disk_cache_mode: DiskCacheMode,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            is_progressive_decoding_enabled: true,
            is_resumable_data_enabled: true,
            is_rate_limiter_enabled: true,
            is_decompression_enabled: true,
            preview_policy: PreviewPolicy::DefaultForFormat,
            disk_cache_policy: DataCachePolicy::Automatic,
            disk_cache_mode: DiskCacheMode::All,
        }
    }
}

/// Queue and concurrency sizing for the pipeline actor's worker pools:
/// `data-loading`, `decoding`, `processing`, and `encoding` each get their
/// own bound, matched one-to-one with the `WorkQueue`s in `actor.rs`.
#[derive(Debug, Clone, Copy)]
pub struct QueueSizing {
    pub max_concurrent_data_loads: usize,
    pub max_concurrent_decodes: usize,
    pub max_concurrent_processors: usize,
    pub max_concurrent_encodes: usize,
    pub command_queue_capacity: usize,
}

impl Default for QueueSizing {
    fn default() -> Self {
        Self {
            max_concurrent_data_loads: DEFAULT_MAX_CONCURRENT_DATA_LOADS,
            max_concurrent_decodes: DEFAULT_MAX_CONCURRENT_DECODES,
            max_concurrent_processors: DEFAULT_MAX_CONCURRENT_PROCESSORS,
            max_concurrent_encodes: DEFAULT_MAX_CONCURRENT_ENCODES,
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub rate: f64,
    pub burst: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { rate: DEFAULT_RATE, burst: DEFAULT_BURST }
    }
}

/// Everything an [`crate::pipeline::ImagePipeline`] needs to run. Cheap to
/// clone: every collaborator is already behind an `Arc`.
#[derive(Clone)]
pub struct PipelineConfig {
    pub data_loader: Arc<dyn DataLoader>,
    pub data_cache: Option<Arc<DataCache>>,
    pub image_cache: Option<Arc<MemoryCache>>,
    pub decoder_registry: Arc<DecoderRegistry>,
    pub encoder: Arc<dyn Encoder>,
    pub queue_sizing: QueueSizing,
    pub policy: PolicyFlags,
    pub rate_limiter: RateLimiterConfig,
    pub disk_flush_interval: Duration,
}

pub struct PipelineConfigBuilder {
    data_loader: Option<Arc<dyn DataLoader>>,
    data_cache: Option<Arc<DataCache>>,
    image_cache: Option<Arc<MemoryCache>>,
    decoder_registry: Option<Arc<DecoderRegistry>>,
    encoder: Option<Arc<dyn Encoder>>,
    queue_sizing: QueueSizing,
    policy: PolicyFlags,
    rate_limiter: RateLimiterConfig,
    disk_flush_interval: Duration,
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self {
            data_loader: None,
            data_cache: None,
            image_cache: Some(Arc::new(MemoryCache::new(Default::default()))),
            decoder_registry: None,
            encoder: None,
            queue_sizing: QueueSizing::default(),
            policy: PolicyFlags::default(),
            rate_limiter: RateLimiterConfig::default(),
            disk_flush_interval: crate::disk_cache::DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_loader(mut self, loader: Arc<dyn DataLoader>) -> Self {
        self.data_loader = Some(loader);
        self
    }

    pub fn data_cache(mut self, cache: Arc<DataCache>) -> Self {
        self.data_cache = Some(cache);
        self
    }

    pub fn image_cache(mut self, cache: Option<Arc<MemoryCache>>) -> Self {
        self.image_cache = cache;
        self
    }

    pub fn decoder_registry(mut self, registry: Arc<DecoderRegistry>) -> Self {
        self.decoder_registry = Some(registry);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn queue_sizing(mut self, sizing: QueueSizing) -> Self {
        self.queue_sizing = sizing;
        self
    }

    pub fn policy(mut self, policy: PolicyFlags) -> Self {
        self.policy = policy;
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn disk_flush_interval(mut self, interval: Duration) -> Self {
        self.disk_flush_interval = interval;
        self
    }

    /// Finalize. `data_loader` defaults to an [`crate::data_loader::HttpDataLoader`]
    /// sharing this config's rate limiter, with `PolicyFlags` wired through
    /// to its rate-limiting/resumable gates and its `reqwest::Client`'s
    /// content-decoding; `decoder_registry`/`encoder` default to the
    /// in-tree reference codecs.
    pub fn build(self) -> PipelineConfig {
        let rate_limiter = Arc::new(crate::rate_limiter::RateLimiter::new(
            self.rate_limiter.rate,
            self.rate_limiter.burst,
        ));
        let data_loader = self.data_loader.unwrap_or_else(|| {
            let client = reqwest::Client::builder()
                .gzip(self.policy.is_decompression_enabled)
                .brotli(self.policy.is_decompression_enabled)
                .deflate(self.policy.is_decompression_enabled)
                .build()
                .unwrap_or_default();
            Arc::new(
                crate::data_loader::HttpDataLoader::new(client, rate_limiter)
                    .with_rate_limiter_enabled(self.policy.is_rate_limiter_enabled)
                    .with_resumable_enabled(self.policy.is_resumable_data_enabled),
            )
        });
        let decoder_registry = self
            .decoder_registry
            .unwrap_or_else(|| Arc::new(DecoderRegistry::with_reference_decoder(self.policy.preview_policy)));
        let encoder = self.encoder.unwrap_or_else(|| Arc::new(PassthroughEncoder));

        PipelineConfig {
            data_loader,
            data_cache: self.data_cache,
            image_cache: self.image_cache,
            decoder_registry,
            encoder,
            queue_sizing: self.queue_sizing,
            policy: self.policy,
            rate_limiter: self.rate_limiter,
            disk_flush_interval: self.disk_flush_interval,
        }
    }
}
