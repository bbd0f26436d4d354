//! Public entry point: `ImagePipeline`, the orchestrator callers interact
//! with. Internally it is a thin, cloneable handle onto a [`PipelineActor`]
//! plus direct (actor-bypassing) access to the memory/disk caches for
//! synchronous cache reads and writes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::actor::{DataEvent, ImageEvent, PipelineActor};
use crate::config::PipelineConfig;
use crate::container::{DataResponse, ImageContainer, ImageResponse, ResponseSource};
use crate::error::ImagePipelineError;
use crate::keys::{DataCachePolicy, DiskCacheKey, MemoryCacheKey, OriginalImageLoadKey, ProcessedImageLoadKey};
use crate::request::{ImageRequest, Priority};
use crate::task::{SubscriptionId, TaskEvent};

enum HandleKind {
    Processed { key: ProcessedImageLoadKey, id: SubscriptionId },
    Data { key: OriginalImageLoadKey, id: SubscriptionId },
    /// Resolved synchronously from a cache; nothing to cancel or
    /// re-prioritize.
    Cached,
}

/// A live subscription to an image or data load. Dropping this without
/// calling `cancel` leaves the underlying task running for any other
/// subscriber still attached to it.
pub struct ImageTaskHandle {
    actor: PipelineActor,
    kind: HandleKind,
}

impl ImageTaskHandle {
    pub fn cancel(&self) {
        match &self.kind {
            HandleKind::Processed { key, id } => {
                let key = key.clone();
                let id = *id;
                self.actor.dispatch(move |state| state.unsubscribe_processed(&key, id));
            }
            HandleKind::Data { key, id } => {
                let key = key.clone();
                let id = *id;
                self.actor.dispatch(move |state| state.unsubscribe_data(&key, id));
            }
            HandleKind::Cached => {}
        }
    }

    pub fn set_priority(&self, priority: Priority) {
        match &self.kind {
            HandleKind::Processed { key, id } => {
                let key = key.clone();
                let id = *id;
                self.actor.dispatch(move |state| state.set_processed_priority(&key, id, priority));
            }
            HandleKind::Data { key, id } => {
                let key = key.clone();
                let id = *id;
                self.actor.dispatch(move |state| state.set_data_priority(&key, id, priority));
            }
            HandleKind::Cached => {}
        }
    }

    fn is_cached(&self) -> bool {
        matches!(self.kind, HandleKind::Cached)
    }
}

/// The concurrent image loading pipeline. Cheap to clone; every clone
/// shares the same actor and caches.
#[derive(Clone)]
pub struct ImagePipeline {
    actor: PipelineActor,
    config: PipelineConfig,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        if let Some(cache) = config.data_cache.clone() {
            cache.spawn_flush_loop(config.disk_flush_interval);
        }
        let actor = PipelineActor::spawn(config.clone());
        Self { actor, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ---- cache sub-API --------------------------------------------------

    pub fn cached_image(&self, request: &ImageRequest) -> Option<Arc<ImageContainer>> {
        if request.options().disable_memory_cache_reads {
            return None;
        }
        self.config.image_cache.as_ref()?.get(&MemoryCacheKey::for_request(request))
    }

    pub fn store_cached_image(&self, request: &ImageRequest, container: Arc<ImageContainer>) {
        if let Some(cache) = &self.config.image_cache {
            cache.set(MemoryCacheKey::for_request(request), container);
        }
    }

    pub fn remove_cached_image(&self, request: &ImageRequest) {
        if let Some(cache) = &self.config.image_cache {
            cache.remove(&MemoryCacheKey::for_request(request));
        }
    }

    pub fn remove_all_cached_images(&self) {
        if let Some(cache) = &self.config.image_cache {
            cache.remove_all();
        }
    }

    /// Reads the raw-bytes entry for `request`, keyed the same way a data
    /// fetch's write-through keys it: on the original bytes alone,
    /// independent of processor pipeline.
    pub async fn cached_data(&self, request: &ImageRequest) -> Option<Arc<Vec<u8>>> {
        if request.options().disable_disk_cache_reads {
            return None;
        }
        let cache = self.config.data_cache.clone()?;
        let key = DiskCacheKey::for_request(request, DataCachePolicy::OriginalData);
        cache.get(&key).await
    }

    // ---- image loading ---------------------------------------------------

    /// Subscribe to the full event stream (progress, previews, final
    /// result) for a request. Resolves immediately from the memory cache
    /// when possible.
    pub async fn subscribe_image(&self, request: ImageRequest) -> (ImageTaskHandle, mpsc::UnboundedReceiver<ImageEvent>) {
        if let Some(container) = self.cached_image(&request) {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(TaskEvent::Completed(Ok(container)));
            return (ImageTaskHandle { actor: self.actor.clone(), kind: HandleKind::Cached }, rx);
        }

        let processed_key = ProcessedImageLoadKey::for_request(&request);
        let original_key = OriginalImageLoadKey::for_request(&request);
        let priority = request.priority();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request_for_actor = request.clone();
        let processed_key_for_actor = processed_key.clone();
        let original_key_for_actor = original_key.clone();
        self.actor.dispatch(move |state| {
            let outcome = state.subscribe_processed(processed_key_for_actor, original_key_for_actor, request_for_actor, priority);
            let _ = reply_tx.send(outcome);
        });
        let outcome = reply_rx.await.expect("pipeline actor task is alive");
        let handle = ImageTaskHandle {
            actor: self.actor.clone(),
            kind: HandleKind::Processed { key: processed_key, id: outcome.subscription_id },
        };
        (handle, outcome.receiver)
    }

    /// Load a single image end to end, returning once the final container
    /// (or a failure) arrives. For progressive consumption, use
    /// [`Self::subscribe_image`] directly.
    pub async fn load_image(&self, request: ImageRequest) -> Result<ImageResponse, ImagePipelineError> {
        let (handle, mut rx) = self.subscribe_image(request.clone()).await;
        let was_cached = handle.is_cached();
        while let Some(event) = rx.recv().await {
            match event {
                TaskEvent::Completed(Ok(container)) => {
                    let source = if was_cached { ResponseSource::Memory } else { ResponseSource::Network };
                    return Ok(ImageResponse { container, request, source });
                }
                TaskEvent::Completed(Err(err)) => return Err(err),
                _ => continue,
            }
        }
        Err(ImagePipelineError::Cancelled)
    }

    // ---- raw data loading -------------------------------------------------

    pub async fn subscribe_data(&self, request: ImageRequest) -> (ImageTaskHandle, mpsc::UnboundedReceiver<DataEvent>) {
        if let Some(bytes) = self.cached_data(&request).await {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(TaskEvent::Completed(Ok(bytes)));
            return (ImageTaskHandle { actor: self.actor.clone(), kind: HandleKind::Cached }, rx);
        }

        let original_key = OriginalImageLoadKey::for_request(&request);
        let priority = request.priority();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request_for_actor = request.clone();
        let original_key_for_actor = original_key.clone();
        self.actor.dispatch(move |state| {
            let outcome = state.subscribe_data(original_key_for_actor, request_for_actor, priority);
            let _ = reply_tx.send(outcome);
        });
        let outcome = reply_rx.await.expect("pipeline actor task is alive");
        let handle = ImageTaskHandle {
            actor: self.actor.clone(),
            kind: HandleKind::Data { key: original_key, id: outcome.subscription_id },
        };
        (handle, outcome.receiver)
    }

    pub async fn load_data(&self, request: ImageRequest) -> Result<DataResponse, ImagePipelineError> {
        let (handle, mut rx) = self.subscribe_data(request.clone()).await;
        let was_cached = handle.is_cached();
        while let Some(event) = rx.recv().await {
            match event {
                TaskEvent::Completed(Ok(bytes)) => {
                    let source = if was_cached { ResponseSource::Disk } else { ResponseSource::Network };
                    return Ok(DataResponse { bytes, request, source });
                }
                TaskEvent::Completed(Err(err)) => return Err(err),
                _ => continue,
            }
        }
        Err(ImagePipelineError::Cancelled)
    }
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
        bytes.extend(std::iter::repeat(0u8).take(256));
        bytes
    }

    async fn test_pipeline(loader: StaticDataLoader) -> ImagePipeline {
        let config = PipelineConfigBuilder::new()
            .data_loader(Arc::new(loader))
            .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Disabled)))
            .encoder(Arc::new(PassthroughEncoder))
            .build();
        ImagePipeline::new(config)
    }

    #[tokio::test]
    async fn load_image_decodes_and_caches() {
        let loader = StaticDataLoader::new();
        loader.insert("https://e.com/a.png", png_bytes());
        let pipeline = test_pipeline(loader).await;
        let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());

        let response = pipeline.load_image(request.clone()).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert!(pipeline.cached_image(&request).is_some());

        let second = pipeline.load_image(request.clone()).await.unwrap();
        assert_eq!(second.source, ResponseSource::Memory);
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_image_dedup() {
        let loader = Arc::new(StaticDataLoader::new());
        loader.insert("https://e.com/a.png", png_bytes());
        let config = PipelineConfigBuilder::new()
            .data_loader(loader.clone())
            .decoder_registry(Arc::new(DecoderRegistry::with_reference_decoder(PreviewPolicy::Disabled)))
            .encoder(Arc::new(PassthroughEncoder))
            .build();
        let pipeline = ImagePipeline::new(config);
        let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());

        let a = pipeline.load_image(request.clone());
        let b = pipeline.load_image(request.clone());
        let c = pipeline.load_image(request.clone());
        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert!(rc.is_ok());
        assert_eq!(loader.call_count(), 1, "three concurrent requests for one image must fetch exactly once");
    }

    #[tokio::test]
    async fn missing_entry_surfaces_data_loading_error() {
        let loader = StaticDataLoader::new();
        let pipeline = test_pipeline(loader).await;
        let request = ImageRequest::new(Url::parse("https://e.com/missing.png").unwrap());
        let result = pipeline.load_image(request).await;
        assert!(matches!(result, Err(ImagePipelineError::DataLoadingFailed(_))));
    }

    #[tokio::test]
    async fn load_data_bypasses_decode() {
        let loader = StaticDataLoader::new();
        loader.insert("https://e.com/a.bin", vec![1, 2, 3, 4]);
        let pipeline = test_pipeline(loader).await;
        let request = ImageRequest::new(Url::parse("https://e.com/a.bin").unwrap());
        let response = pipeline.load_data(request).await.unwrap();
        assert_eq!(response.bytes.as_slice(), &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancel_before_completion_does_not_panic() {
        let loader = StaticDataLoader::new();
        loader.insert("https://e.com/a.png", png_bytes());
        let pipeline = test_pipeline(loader).await;
        let request = ImageRequest::new(Url::parse("https://e.com/a.png").unwrap());
        let (handle, _rx) = pipeline.subscribe_image(request).await;
        handle.cancel();
    }
}
