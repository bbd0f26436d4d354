//! A concurrent image loading pipeline: request deduplication, in-memory
//! and on-disk caching, progressive decoding, processor pipelines, and
//! resumable downloads, built around a single-threaded actor that owns
//! all task-graph state.
//!
//! The typical entry point is [`ImagePipeline`], built from a
//! [`PipelineConfig`] via [`PipelineConfigBuilder`]:
//!
//! ```no_run
//! use image_pipeline::{ImagePipeline, ImageRequest, PipelineConfigBuilder};
//! use url::Url;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = ImagePipeline::new(PipelineConfigBuilder::new().build());
//! let request = ImageRequest::new(Url::parse("https://example.com/cat.jpg")?);
//! let response = pipeline.load_image(request).await?;
//! println!("decoded {:?}", response.container.size());
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod codec;
pub mod config;
pub mod container;
pub mod data_loader;
pub mod disk_cache;
pub mod error;
pub mod keys;
pub mod memory_cache;
pub mod pipeline;
pub mod prefetcher;
pub mod queue;
pub mod rate_limiter;
pub mod request;
pub mod resumable;
pub mod task;

pub use codec::{
    Decoder, DecoderContext, DecoderFactory, DecoderRegistry, Encoder, IdentityProcessor,
    PassthroughEncoder, PreviewPolicy, Processor, ProcessorHandle, ProcessingContext,
    ReferenceDecoder, ReferenceDecoderFactory, ResizeProcessor,
};
pub use config::{DiskCacheMode, PipelineConfig, PipelineConfigBuilder, PolicyFlags, QueueSizing, RateLimiterConfig};
pub use container::{DataResponse, ImageContainer, ImageFormat, ImageResponse, ImageSize, ResponseSource};
pub use data_loader::{DataLoader, HttpDataLoader, LoadedData, StaticDataLoader};
pub use disk_cache::{DataCache, DiskCacheConfig, FilenameGenerator, Sha1FilenameGenerator};
pub use error::{ImagePipelineError, Result, SimpleError};
pub use keys::{DataCachePolicy, DiskCacheKey, MemoryCacheKey, OriginalImageLoadKey, ProcessedImageLoadKey};
pub use memory_cache::{MemoryCache, MemoryCacheLimits};
pub use pipeline::{ImagePipeline, ImageTaskHandle};
pub use prefetcher::{PrefetchDestination, PrefetchToken, Prefetcher, DEFAULT_MAX_CONCURRENT_PREFETCHES};
pub use rate_limiter::RateLimiter;
pub use request::{CachePolicy, HttpMethod, ImageRequest, NetworkRequest, Priority, RequestOptions};
pub use resumable::{ResumableData, ResumableDataStore, Validator};
pub use task::TaskEvent;
