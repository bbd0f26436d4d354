//! Background prefetching: warms the memory/disk caches for requests that
//! aren't needed yet, at low priority and bounded concurrency, without
//! competing with foreground loads for the pipeline's data-load slots any
//! more than a `VeryLow`-priority request already would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pipeline::{ImagePipeline, ImageTaskHandle};
use crate::request::{ImageRequest, Priority};
use crate::task::TaskEvent;

pub const DEFAULT_MAX_CONCURRENT_PREFETCHES: usize = 2;

/// Where a prefetch should end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchDestination {
    /// Decode and process the image, the same as a foreground load, so a
    /// subsequent `load_image` resolves straight from the memory cache.
    MemoryCache,
    /// Fetch the raw bytes and write them to the disk cache only. No
    /// decoder is ever constructed for these requests.
    DiskCache,
}

struct PrefetcherState {
    handles: HashMap<u64, ImageTaskHandle>,
    queue: VecDeque<(u64, ImageRequest, PrefetchDestination)>,
    next_id: u64,
    in_flight: usize,
}

struct Shared {
    pipeline: ImagePipeline,
    paused: AtomicBool,
    max_concurrent: usize,
    state: Mutex<PrefetcherState>,
}

/// A handle to one enqueued or in-flight prefetch request. Dropping it
/// does not cancel the prefetch; call [`Self::cancel`] explicitly.
pub struct PrefetchToken {
    id: u64,
    shared: Arc<Shared>,
}

impl PrefetchToken {
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if let Some(handle) = state.handles.remove(&self.id) {
            handle.cancel();
            return;
        }
        state.queue.retain(|(id, _)| *id != self.id);
    }
}

/// Drives a bounded set of low-priority `ImagePipeline` loads. Cancelling
/// the `Prefetcher` (via [`Prefetcher::cancel_all`], or by dropping it)
/// cancels every request it started.
pub struct Prefetcher {
    shared: Arc<Shared>,
}

impl Prefetcher {
    pub fn new(pipeline: ImagePipeline, max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                pipeline,
                paused: AtomicBool::new(false),
                max_concurrent,
                state: Mutex::new(PrefetcherState {
                    handles: HashMap::new(),
                    queue: VecDeque::new(),
                    next_id: 0,
                    in_flight: 0,
                }),
            }),
        }
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        drain(&self.shared);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Enqueue requests for prefetching, each downgraded to `VeryLow`
    /// priority regardless of what the caller set. `destination` governs
    /// how far through the pipeline each request travels: `MemoryCache`
    /// decodes and processes it like a foreground load, while `DiskCache`
    /// only fetches and persists the raw bytes, skipping the decoder.
    /// Returns a token per request that can cancel it individually.
    pub fn start_prefetching(&self, requests: Vec<ImageRequest>, destination: PrefetchDestination) -> Vec<PrefetchToken> {
        let tokens = {
            let mut state = self.shared.state.lock();
            requests
                .into_iter()
                .map(|request| {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.queue.push_back((id, request.with_priority(Priority::VeryLow), destination));
                    PrefetchToken { id, shared: self.shared.clone() }
                })
                .collect()
        };
        drain(&self.shared);
        tokens
    }

    pub fn cancel_all(&self) {
        let mut state = self.shared.state.lock();
        state.queue.clear();
        for (_, handle) in state.handles.drain() {
            handle.cancel();
        }
    }

    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn drain(shared: &Arc<Shared>) {
    if shared.paused.load(Ordering::SeqCst) {
        return;
    }
    loop {
        let next = {
            let mut state = shared.state.lock();
            if state.in_flight >= shared.max_concurrent {
                None
            } else {
                state.queue.pop_front()
            }
        };
        let Some((id, request, destination)) = next else { break };
        shared.state.lock().in_flight += 1;
        spawn_prefetch(shared.clone(), id, request, destination);
    }
}

fn spawn_prefetch(shared: Arc<Shared>, id: u64, request: ImageRequest, destination: PrefetchDestination) {
    tokio::spawn(async move {
        match destination {
            PrefetchDestination::MemoryCache => {
                let (handle, mut rx) = shared.pipeline.subscribe_image(request).await;
                shared.state.lock().handles.insert(id, handle);
                while let Some(event) = rx.recv().await {
                    if matches!(event, TaskEvent::Completed(_)) {
                        break;
                    }
                }
            }
            PrefetchDestination::DiskCache => {
                let (handle, mut rx) = shared.pipeline.subscribe_data(request).await;
                shared.state.lock().handles.insert(id, handle);
                while let Some(event) = rx.recv().await {
                    if matches!(event, TaskEvent::Completed(_)) {
                        break;
                    }
                }
            }
        }
        {
            let mut state = shared.state.lock();
            state.handles.remove(&id);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        drain(&shared);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecoderRegistry, PassthroughEncoder, PreviewPolicy};
    use crate::config::PipelineConfigBuilder;
    use crate::data_loader::StaticDataLoader;
    use url::Url;

    fn png_bytes() -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend(std::iter::repeat(0u8).take(64));
        bytes
    }

    async fn test_pipeline() -> ImagePipeline {
        let loader = StaticDataLoader::new();
        for i in 0..5 {
            loader.insert(format!("https://e.com/{i}.png"), png_bytes());
        }
        let config = PipelineConfigBuilder::new()
            .data_loader(Arc::new(loader))
            .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Disabled)))
            .encoder(Arc::new(PassthroughEncoder))
            .build();
        ImagePipeline::new(config)
    }

    #[tokio::test]
    async fn prefetching_warms_memory_cache() {
        let pipeline = test_pipeline().await;
        let prefetcher = Prefetcher::new(pipeline.clone(), DEFAULT_MAX_CONCURRENT_PREFETCHES);
        let requests: Vec<_> = (0..3)
            .map(|i| ImageRequest::new(Url::parse(&format!("https://e.com/{i}.png")).unwrap()))
            .collect();
        let _tokens = prefetcher.start_prefetching(requests.clone(), PrefetchDestination::MemoryCache);

        for _ in 0..200 {
            if requests.iter().all(|r| pipeline.cached_image(r).is_some()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        for request in &requests {
            assert!(pipeline.cached_image(request).is_some());
        }
    }

    #[tokio::test]
    async fn paused_prefetcher_does_not_start_new_work() {
        let pipeline = test_pipeline().await;
        let prefetcher = Prefetcher::new(pipeline.clone(), DEFAULT_MAX_CONCURRENT_PREFETCHES);
        prefetcher.pause();
        let request = ImageRequest::new(Url::parse("https://e.com/0.png").unwrap());
        let _tokens = prefetcher.start_prefetching(vec![request], PrefetchDestination::MemoryCache);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(prefetcher.queued_count(), 1);
        assert_eq!(prefetcher.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn dropping_prefetcher_cancels_in_flight_work() {
        let pipeline = test_pipeline().await;
        let prefetcher = Prefetcher::new(pipeline.clone(), DEFAULT_MAX_CONCURRENT_PREFETCHES);
        let request = ImageRequest::new(Url::parse("https://e.com/0.png").unwrap());
        let _tokens = prefetcher.start_prefetching(vec![request], PrefetchDestination::MemoryCache);
        drop(prefetcher);
    }

    #[tokio::test]
    async fn disk_cache_destination_prefetch_skips_decode() {
        let dir = tempfile::tempdir().unwrap();
        let loader = StaticDataLoader::new();
        loader.insert("https://e.com/0.png", png_bytes());
        let disk_cache = Arc::new(
            crate::disk_cache::DataCache::open(dir.path(), crate::disk_cache::DiskCacheConfig::default())
                .await
                .unwrap(),
        );
        let config = PipelineConfigBuilder::new()
            .data_loader(Arc::new(loader))
            .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Disabled)))
            .encoder(Arc::new(PassthroughEncoder))
            .data_cache(disk_cache)
            .build();
        let pipeline = ImagePipeline::new(config);
        let prefetcher = Prefetcher::new(pipeline.clone(), DEFAULT_MAX_CONCURRENT_PREFETCHES);
        let request = ImageRequest::new(Url::parse("https://e.com/0.png").unwrap());

        let _tokens = prefetcher.start_prefetching(vec![request.clone()], PrefetchDestination::DiskCache);

        for _ in 0..200 {
            if pipeline.cached_data(&request).await.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(pipeline.cached_data(&request).await.is_some());
        assert!(pipeline.cached_image(&request).is_none());
    }
}
