//! The pipeline actor: a single tokio task owning every mutable piece of
//! task-graph state (dedup registries, priority queues, in-flight decoder
//! state, pending work). All mutation goes through boxed command closures
//! sent over an unbounded channel, so the actor never needs a lock: it is
//! the only thing that ever touches `ActorState`.
//!
//! Heavy work runs off the actor on its own bounded `WorkQueue`: one each
//! for data-loading, decoding, processing, and encoding, sized by
//! `crate::config::QueueSizing`. A queue only ever has as many jobs running
//! as its configured `max_concurrent_*`; each job is a spawned tokio task
//! that reports its result back into the actor via a further command, the
//! same pattern `spawn_fetch`/`on_fetch_finished` already uses. Progressive
//! preview decoding is the one exception: it runs synchronously inside the
//! actor because it drives a per-task stateful decoder as bytes stream in
//! and is bounded to a handful of cheap scans (see `ReferenceDecoder`), not
//! because it is exempt from the queueing discipline the final pass uses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug_span, warn};

use crate::codec::{DecoderContext, ProcessorHandle};
use crate::config::PipelineConfig;
use crate::container::ImageContainer;
use crate::data_loader::LoadedData;
use crate::error::ImagePipelineError;
use crate::keys::{DataCachePolicy, DiskCacheKey, MemoryCacheKey, OriginalImageLoadKey, ProcessedImageLoadKey};
use crate::queue::WorkQueue;
use crate::request::{ImageRequest, Priority};
use crate::task::{SubscribeOutcome, SubscriptionId, TaskEvent, TaskRegistry};

pub type ImageEvent = TaskEvent<Arc<ImageContainer>, ImagePipelineError>;
pub type DataEvent = TaskEvent<Arc<Vec<u8>>, ImagePipelineError>;

type Command = Box<dyn FnOnce(&mut ActorState) + Send>;

/// A cheap-to-clone handle used to post commands to the actor's loop.
#[derive(Clone)]
pub struct PipelineActor {
    sender: mpsc::Sender<Command>,
}

impl PipelineActor {
    pub fn spawn(config: PipelineConfig) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Command>(config.queue_sizing.command_queue_capacity);
        let handle = Self { sender: sender.clone() };
        let mut state = ActorState::new(config, handle.clone());
        tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                command(&mut state);
            }
        });
        handle
    }

    /// Post a command for the actor to run. If the command queue is full
    /// the command is dropped rather than applying backpressure here: every
    /// caller of `dispatch` is itself either the actor's own fire-and-forget
    /// result handler or a synchronous (non-async) trait method, neither of
    /// which can await a full channel.
    pub fn dispatch(&self, command: impl FnOnce(&mut ActorState) + Send + 'static) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(Box::new(command)) {
            warn!("pipeline actor command queue full, dropping command");
        }
    }
}

struct ProcessedMeta {
    original_key: OriginalImageLoadKey,
    processors: Vec<ProcessorHandle>,
    request: ImageRequest,
}

struct PendingDecode {
    bytes: Arc<Vec<u8>>,
    request: ImageRequest,
}

struct PendingProcessing {
    container: Arc<ImageContainer>,
    processors: Vec<ProcessorHandle>,
    request: ImageRequest,
}

struct PendingEncode {
    container: Arc<ImageContainer>,
    request: ImageRequest,
}

/// All mutable pipeline state, owned exclusively by the actor's loop task.
pub struct ActorState {
    config: PipelineConfig,
    self_handle: PipelineActor,

    decode_tasks: TaskRegistry<OriginalImageLoadKey, Arc<ImageContainer>, ImagePipelineError>,
    data_tasks: TaskRegistry<OriginalImageLoadKey, Arc<Vec<u8>>, ImagePipelineError>,
    processed_tasks: TaskRegistry<ProcessedImageLoadKey, Arc<ImageContainer>, ImagePipelineError>,

    processed_meta: HashMap<ProcessedImageLoadKey, ProcessedMeta>,
    dependents: HashMap<OriginalImageLoadKey, HashSet<ProcessedImageLoadKey>>,
    requests_by_original: HashMap<OriginalImageLoadKey, ImageRequest>,
    /// Stateful progressive decoders, one per in-flight original-image fetch.
    /// Distinct from the one-shot decoder each final decode job constructs
    /// for itself on `decoding-queue`.
    decoders: HashMap<OriginalImageLoadKey, Box<dyn crate::codec::Decoder>>,

    fetch_in_flight: HashSet<OriginalImageLoadKey>,
    load_queue: WorkQueue<OriginalImageLoadKey>,
    queue_ids: HashMap<OriginalImageLoadKey, u64>,
    active_loads: usize,

    decode_queue: WorkQueue<OriginalImageLoadKey>,
    decode_queue_ids: HashMap<OriginalImageLoadKey, u64>,
    pending_decodes: HashMap<OriginalImageLoadKey, PendingDecode>,
    active_decodes: usize,

    processing_queue: WorkQueue<ProcessedImageLoadKey>,
    processing_queue_ids: HashMap<ProcessedImageLoadKey, u64>,
    pending_processing: HashMap<ProcessedImageLoadKey, PendingProcessing>,
    active_processing: usize,

    encoding_queue: WorkQueue<ProcessedImageLoadKey>,
    encoding_queue_ids: HashMap<ProcessedImageLoadKey, u64>,
    pending_encodes: HashMap<ProcessedImageLoadKey, PendingEncode>,
    active_encodes: usize,
}

/// Bytes shorter than this never produce a preview attempt; not worth the
/// decode call.
const MIN_BYTES_FOR_PREVIEW_ATTEMPT: usize = 16;

impl ActorState {
    fn new(config: PipelineConfig, self_handle: PipelineActor) -> Self {
        Self {
            config,
            self_handle,
            decode_tasks: TaskRegistry::new(),
            data_tasks: TaskRegistry::new(),
            processed_tasks: TaskRegistry::new(),
            processed_meta: HashMap::new(),
            dependents: HashMap::new(),
            requests_by_original: HashMap::new(),
            decoders: HashMap::new(),
            fetch_in_flight: HashSet::new(),
            load_queue: WorkQueue::new(),
            queue_ids: HashMap::new(),
            active_loads: 0,
            decode_queue: WorkQueue::new(),
            decode_queue_ids: HashMap::new(),
            pending_decodes: HashMap::new(),
            active_decodes: 0,
            processing_queue: WorkQueue::new(),
            processing_queue_ids: HashMap::new(),
            pending_processing: HashMap::new(),
            active_processing: 0,
            encoding_queue: WorkQueue::new(),
            encoding_queue_ids: HashMap::new(),
            pending_encodes: HashMap::new(),
            active_encodes: 0,
        }
    }

    // ---- public entry points, invoked via PipelineActor::dispatch -----

    pub fn subscribe_processed(
        &mut self,
        processed_key: ProcessedImageLoadKey,
        original_key: OriginalImageLoadKey,
        request: ImageRequest,
        priority: Priority,
    ) -> SubscribeOutcome<Arc<ImageContainer>, ImagePipelineError> {
        let span = debug_span!("processed_task", kind = "processed", priority = ?priority);
        let _enter = span.enter();

        let outcome = self.processed_tasks.subscribe(processed_key.clone(), priority);
        if outcome.is_new {
            self.processed_meta.insert(
                processed_key.clone(),
                ProcessedMeta { original_key: original_key.clone(), processors: request.processors().to_vec(), request: request.clone() },
            );
            self.dependents.entry(original_key.clone()).or_default().insert(processed_key);
        }
        self.ensure_fetch(original_key, request, priority);
        outcome
    }

    pub fn unsubscribe_processed(&mut self, key: &ProcessedImageLoadKey, id: SubscriptionId) {
        if self.processed_tasks.unsubscribe(key, id) {
            if let Some(meta) = self.processed_meta.remove(key) {
                if let Some(set) = self.dependents.get_mut(&meta.original_key) {
                    set.remove(key);
                    if set.is_empty() {
                        self.dependents.remove(&meta.original_key);
                    }
                }
                self.cancel_fetch_if_unneeded(&meta.original_key);
            }
            if let Some(qid) = self.processing_queue_ids.remove(key) {
                self.processing_queue.cancel(qid);
            }
            self.pending_processing.remove(key);
            if let Some(qid) = self.encoding_queue_ids.remove(key) {
                self.encoding_queue.cancel(qid);
            }
            self.pending_encodes.remove(key);
        }
    }

    pub fn set_processed_priority(&mut self, key: &ProcessedImageLoadKey, id: SubscriptionId, priority: Priority) {
        self.processed_tasks.set_priority(key, id, priority);
        if let Some(new_priority) = self.processed_tasks.priority(key) {
            if let Some(&qid) = self.processing_queue_ids.get(key) {
                self.processing_queue.set_priority(qid, new_priority.to_bucket());
            }
            if let Some(&qid) = self.encoding_queue_ids.get(key) {
                self.encoding_queue.set_priority(qid, new_priority.to_bucket());
            }
        }
        if let Some(meta) = self.processed_meta.get(key) {
            let original_key = meta.original_key.clone();
            if let Some(new_priority) = self.aggregate_original_priority(&original_key) {
                if let Some(&qid) = self.queue_ids.get(&original_key) {
                    self.load_queue.set_priority(qid, new_priority.to_bucket());
                }
                if let Some(&qid) = self.decode_queue_ids.get(&original_key) {
                    self.decode_queue.set_priority(qid, new_priority.to_bucket());
                }
            }
        }
    }

    pub fn subscribe_data(
        &mut self,
        original_key: OriginalImageLoadKey,
        request: ImageRequest,
        priority: Priority,
    ) -> SubscribeOutcome<Arc<Vec<u8>>, ImagePipelineError> {
        let outcome = self.data_tasks.subscribe(original_key.clone(), priority);
        self.ensure_fetch(original_key, request, priority);
        outcome
    }

    pub fn unsubscribe_data(&mut self, key: &OriginalImageLoadKey, id: SubscriptionId) {
        if self.data_tasks.unsubscribe(key, id) {
            self.cancel_fetch_if_unneeded(key);
        }
    }

    pub fn set_data_priority(&mut self, key: &OriginalImageLoadKey, id: SubscriptionId, priority: Priority) {
        self.data_tasks.set_priority(key, id, priority);
        if let Some(new_priority) = self.aggregate_original_priority(key) {
            if let Some(&qid) = self.queue_ids.get(key) {
                self.load_queue.set_priority(qid, new_priority.to_bucket());
            }
            if let Some(&qid) = self.decode_queue_ids.get(key) {
                self.decode_queue.set_priority(qid, new_priority.to_bucket());
            }
        }
    }

    // ---- fetch lifecycle ----------------------------------------------

    fn aggregate_original_priority(&self, original_key: &OriginalImageLoadKey) -> Option<Priority> {
        let mut best: Option<Priority> = self.data_tasks.priority(original_key);
        if let Some(dependents) = self.dependents.get(original_key) {
            for processed_key in dependents {
                if let Some(p) = self.processed_tasks.priority(processed_key) {
                    best = Some(best.map_or(p, |b| b.max(p)));
                }
            }
        }
        best
    }

    fn ensure_fetch(&mut self, original_key: OriginalImageLoadKey, request: ImageRequest, priority: Priority) {
        self.requests_by_original.entry(original_key.clone()).or_insert(request);
        if self.fetch_in_flight.contains(&original_key) {
            if let Some(&qid) = self.queue_ids.get(&original_key) {
                self.load_queue.set_priority(qid, priority.to_bucket());
            }
            return;
        }
        if self.queue_ids.contains_key(&original_key) {
            return; // already queued, not yet started
        }
        let qid = self.load_queue.push(original_key.clone(), priority.to_bucket());
        self.queue_ids.insert(original_key, qid);
        self.drain_queue();
    }

    /// Cancel a still-queued (not yet started) job once its last interested
    /// subscriber is gone. A fetch already in flight is left to finish:
    /// another subscriber may well arrive before it does, and the bytes get
    /// cached either way.
    fn cancel_fetch_if_unneeded(&mut self, original_key: &OriginalImageLoadKey) {
        let still_wanted = self.data_tasks.contains(original_key) || self.dependents.contains_key(original_key);
        if still_wanted {
            return;
        }
        if let Some(qid) = self.queue_ids.remove(original_key) {
            self.load_queue.cancel(qid);
        }
        if let Some(qid) = self.decode_queue_ids.remove(original_key) {
            self.decode_queue.cancel(qid);
            self.pending_decodes.remove(original_key);
        }
    }

    fn drain_queue(&mut self) {
        while self.active_loads < self.config.queue_sizing.max_concurrent_data_loads {
            let Some(original_key) = self.load_queue.pop() else { break };
            self.queue_ids.remove(&original_key);
            self.active_loads += 1;
            self.spawn_fetch(original_key);
        }
    }

    fn spawn_fetch(&mut self, original_key: OriginalImageLoadKey) {
        self.fetch_in_flight.insert(original_key.clone());
        let request = self
            .requests_by_original
            .get(&original_key)
            .cloned()
            .expect("representative request recorded before spawning fetch");
        let network_request = request.source().clone();
        let config = self.config.clone();
        let actor = self.self_handle.clone();

        let progress_actor = actor.clone();
        let progress_key = original_key.clone();
        let on_progress = move |completed: u64, total: u64| {
            let actor = progress_actor.clone();
            let key = progress_key.clone();
            actor.dispatch(move |state| state.on_fetch_progress(&key, completed, total));
        };

        let chunk_actor = actor.clone();
        let chunk_key = original_key.clone();
        let on_chunk = move |bytes: &[u8]| {
            let actor = chunk_actor.clone();
            let key = chunk_key.clone();
            let bytes = bytes.to_vec();
            actor.dispatch(move |state| state.on_fetch_chunk(&key, bytes));
        };

        tokio::spawn(async move {
            let result = config.data_loader.load(&network_request, &on_progress, &on_chunk).await;
            let done_key = original_key.clone();
            actor.dispatch(move |state| state.on_fetch_finished(done_key, result));
        });
    }

    fn on_fetch_progress(&mut self, key: &OriginalImageLoadKey, completed: u64, total: u64) {
        self.decode_tasks.publish(key, ImageEvent::Progress { completed, total });
        self.data_tasks.publish(key, DataEvent::Progress { completed, total });
    }

    fn on_fetch_chunk(&mut self, key: &OriginalImageLoadKey, bytes: Vec<u8>) {
        if !self.config.policy.is_progressive_decoding_enabled {
            return;
        }
        if bytes.len() < MIN_BYTES_FOR_PREVIEW_ATTEMPT {
            return;
        }
        let Some(request) = self.requests_by_original.get(key).cloned() else { return };

        if !self.decoders.contains_key(key) {
            let ctx = DecoderContext { request: &request, is_final: false };
            if let Some(decoder) = self.config.decoder_registry.create(&ctx, &bytes) {
                self.decoders.insert(key.clone(), decoder);
            } else {
                return;
            }
        }
        let Some(decoder) = self.decoders.get_mut(key) else { return };
        let Some(preview) = decoder.decode_partial(&bytes) else { return };
        let preview = Arc::new(preview);
        self.decode_tasks.publish(key, ImageEvent::Preview(preview.clone()));
        self.fan_out_preview(key, &preview);
    }

    fn fan_out_preview(&mut self, original_key: &OriginalImageLoadKey, container: &Arc<ImageContainer>) {
        let Some(dependents) = self.dependents.get(original_key).cloned() else { return };
        for processed_key in dependents {
            let Some(meta) = self.processed_meta.get(&processed_key) else { continue };
            if meta.processors.is_empty() || !meta.processors.iter().all(|p| p.supports_progressive()) {
                continue;
            }
            match apply_processors(container, &meta.processors, &meta.request, false) {
                Ok(Some(out)) => self.processed_tasks.publish(&processed_key, TaskEvent::Preview(Arc::new(out))),
                Ok(None) | Err(_) => {}
            }
        }
    }

    fn on_fetch_finished(&mut self, key: OriginalImageLoadKey, result: Result<LoadedData, ImagePipelineError>) {
        self.active_loads = self.active_loads.saturating_sub(1);
        self.fetch_in_flight.remove(&key);
        self.decoders.remove(&key);
        let request = self.requests_by_original.remove(&key);

        match result {
            Ok(loaded) => {
                let bytes = Arc::new(loaded.bytes);
                self.data_tasks.publish(&key, DataEvent::Completed(Ok(bytes.clone())));

                if let Some(request) = request {
                    if !request.options().disable_disk_cache_writes && self.config.policy.disk_cache_mode.allows_originals() {
                        if let Some(cache) = self.config.data_cache.clone() {
                            let disk_key = DiskCacheKey::for_request(&request, DataCachePolicy::OriginalData);
                            cache.set(&disk_key, bytes.clone());
                        }
                    }

                    // A disk-cache-only data load (e.g. a prefetch with a
                    // disk destination) has no decode-task subscribers and
                    // no processed dependents; skip the decoder entirely.
                    if self.decode_tasks.contains(&key) || self.dependents.contains_key(&key) {
                        self.enqueue_decode(key, bytes, request);
                    }
                }
            }
            Err(err) => {
                self.data_tasks.publish(&key, DataEvent::Completed(Err(err.clone())));
                self.decode_tasks.publish(&key, ImageEvent::Completed(Err(err.clone())));
                self.fail_dependents(&key, err);
                self.dependents.remove(&key);
            }
        }

        self.drain_queue();
    }

    // ---- decoding-queue --------------------------------------------------

    fn enqueue_decode(&mut self, key: OriginalImageLoadKey, bytes: Arc<Vec<u8>>, request: ImageRequest) {
        let priority = self.aggregate_original_priority(&key).unwrap_or_default();
        self.pending_decodes.insert(key.clone(), PendingDecode { bytes, request });
        let qid = self.decode_queue.push(key.clone(), priority.to_bucket());
        self.decode_queue_ids.insert(key, qid);
        self.drain_decode_queue();
    }

    fn drain_decode_queue(&mut self) {
        while self.active_decodes < self.config.queue_sizing.max_concurrent_decodes {
            let Some(key) = self.decode_queue.pop() else { break };
            self.decode_queue_ids.remove(&key);
            let Some(pending) = self.pending_decodes.remove(&key) else { continue };
            self.active_decodes += 1;
            self.spawn_decode(key, pending);
        }
    }

    fn spawn_decode(&mut self, key: OriginalImageLoadKey, pending: PendingDecode) {
        let registry = self.config.decoder_registry.clone();
        let actor = self.self_handle.clone();
        tokio::spawn(async move {
            let ctx = DecoderContext { request: &pending.request, is_final: true };
            let result = match registry.create(&ctx, &pending.bytes) {
                Some(mut decoder) => decoder.decode(&pending.bytes).map(Arc::new),
                None => Err(ImagePipelineError::DecoderNotRegistered),
            };
            let done_key = key.clone();
            actor.dispatch(move |state| state.on_decode_finished(done_key, result));
        });
    }

    fn on_decode_finished(&mut self, key: OriginalImageLoadKey, result: Result<Arc<ImageContainer>, ImagePipelineError>) {
        self.active_decodes = self.active_decodes.saturating_sub(1);
        match result {
            Ok(container) => {
                self.decode_tasks.publish(&key, ImageEvent::Completed(Ok(container.clone())));
                self.enqueue_processing_for_dependents(&key, container);
            }
            Err(err) => {
                warn!(error = %err, "decode failed");
                self.decode_tasks.publish(&key, ImageEvent::Completed(Err(err.clone())));
                self.fail_dependents(&key, err);
            }
        }
        self.dependents.remove(&key);
        self.drain_decode_queue();
    }

    fn fail_dependents(&mut self, original_key: &OriginalImageLoadKey, err: ImagePipelineError) {
        let Some(dependents) = self.dependents.get(original_key).cloned() else { return };
        for processed_key in dependents {
            self.processed_meta.remove(&processed_key);
            self.processed_tasks.publish(&processed_key, TaskEvent::Completed(Err(err.clone())));
        }
    }

    // ---- processing-queue --------------------------------------------------

    fn enqueue_processing_for_dependents(&mut self, original_key: &OriginalImageLoadKey, container: Arc<ImageContainer>) {
        let Some(dependents) = self.dependents.get(original_key).cloned() else { return };
        for processed_key in dependents {
            let Some(meta) = self.processed_meta.remove(&processed_key) else { continue };
            let priority = self.processed_tasks.priority(&processed_key).unwrap_or_default();
            self.pending_processing.insert(
                processed_key.clone(),
                PendingProcessing { container: container.clone(), processors: meta.processors, request: meta.request },
            );
            let qid = self.processing_queue.push(processed_key.clone(), priority.to_bucket());
            self.processing_queue_ids.insert(processed_key, qid);
        }
        self.drain_processing_queue();
    }

    fn drain_processing_queue(&mut self) {
        while self.active_processing < self.config.queue_sizing.max_concurrent_processors {
            let Some(key) = self.processing_queue.pop() else { break };
            self.processing_queue_ids.remove(&key);
            let Some(pending) = self.pending_processing.remove(&key) else { continue };
            self.active_processing += 1;
            self.spawn_processing(key, pending);
        }
    }

    fn spawn_processing(&mut self, key: ProcessedImageLoadKey, pending: PendingProcessing) {
        let actor = self.self_handle.clone();
        tokio::spawn(async move {
            let result = apply_processors(&pending.container, &pending.processors, &pending.request, true);
            let request = pending.request;
            let done_key = key.clone();
            actor.dispatch(move |state| state.on_processing_finished(done_key, result, request));
        });
    }

    fn on_processing_finished(
        &mut self,
        key: ProcessedImageLoadKey,
        result: Result<Option<ImageContainer>, ImagePipelineError>,
        request: ImageRequest,
    ) {
        self.active_processing = self.active_processing.saturating_sub(1);
        match result {
            Ok(Some(out)) => {
                let out = Arc::new(out);
                if !request.options().disable_memory_cache_writes {
                    if let Some(cache) = &self.config.image_cache {
                        cache.set(MemoryCacheKey::for_request(&request), out.clone());
                    }
                }
                self.processed_tasks.publish(&key, TaskEvent::Completed(Ok(out.clone())));

                if !request.options().disable_disk_cache_writes
                    && self.config.policy.disk_cache_mode.allows_processed()
                    && self.config.data_cache.is_some()
                {
                    self.enqueue_encode(key, out, request);
                }
            }
            Ok(None) => {
                let err = ImagePipelineError::processing_failed(crate::error::SimpleError::new(
                    "processor pipeline produced no output",
                ));
                self.processed_tasks.publish(&key, TaskEvent::Completed(Err(err)));
            }
            Err(err) => {
                self.processed_tasks.publish(&key, TaskEvent::Completed(Err(err)));
            }
        }
        self.drain_processing_queue();
    }

    // ---- encoding-queue --------------------------------------------------

    fn enqueue_encode(&mut self, key: ProcessedImageLoadKey, container: Arc<ImageContainer>, request: ImageRequest) {
        let priority = self.processed_tasks.priority(&key).unwrap_or_default();
        self.pending_encodes.insert(key.clone(), PendingEncode { container, request });
        let qid = self.encoding_queue.push(key.clone(), priority.to_bucket());
        self.encoding_queue_ids.insert(key, qid);
        self.drain_encoding_queue();
    }

    fn drain_encoding_queue(&mut self) {
        while self.active_encodes < self.config.queue_sizing.max_concurrent_encodes {
            let Some(key) = self.encoding_queue.pop() else { break };
            self.encoding_queue_ids.remove(&key);
            let Some(pending) = self.pending_encodes.remove(&key) else { continue };
            self.active_encodes += 1;
            self.spawn_encode(key, pending);
        }
    }

    fn spawn_encode(&mut self, key: ProcessedImageLoadKey, pending: PendingEncode) {
        let encoder = self.config.encoder.clone();
        let data_cache = self.config.data_cache.clone();
        let policy = self.config.policy.disk_cache_policy;
        let actor = self.self_handle.clone();
        tokio::spawn(async move {
            let encoded = encoder.encode(&pending.container);
            if let (Some(cache), Some(bytes)) = (data_cache, encoded) {
                let disk_key = DiskCacheKey::for_request(&pending.request, policy);
                cache.set(&disk_key, Arc::new(bytes));
            }
            let done_key = key.clone();
            actor.dispatch(move |state| state.on_encode_finished(done_key));
        });
    }

    fn on_encode_finished(&mut self, _key: ProcessedImageLoadKey) {
        self.active_encodes = self.active_encodes.saturating_sub(1);
        self.drain_encoding_queue();
    }

    // ---- synchronous cache accessors -----------------------------------

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Run a request's full processor pipeline over `container`. On a
/// non-final (progressive) call, every processor must already have opted
/// into `supports_progressive` (callers filter for that before invoking
/// this), so a `None` here means a processor legitimately declined this
/// scan, not a bug.
fn apply_processors(
    container: &ImageContainer,
    processors: &[ProcessorHandle],
    request: &ImageRequest,
    is_final: bool,
) -> Result<Option<ImageContainer>, ImagePipelineError> {
    let mut current = container.clone();
    for processor in processors {
        let ctx = crate::codec::ProcessingContext { request, is_final };
        match processor.process(&current, &ctx)? {
            Some(next) => current = next,
            None => {
                if is_final {
                    return Err(ImagePipelineError::processing_failed(crate::error::SimpleError::new(format!(
                        "processor {} produced no output on final pass",
                        processor.identifier()
                    ))));
                }
                return Ok(None);
            }
        }
    }
    Ok(Some(current))
}
