//! Pluggable decoder/encoder/processor contracts, plus a minimal in-tree
//! reference implementation of each so the pipeline is exercisable end to
//! end without pulling in a real image-decoding crate. None of the
//! reference types claim bit-exact decode output.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::container::{ImageContainer, ImageFormat, ImageSize};
use crate::error::{ImagePipelineError, SimpleError};
use crate::request::ImageRequest;

/// How aggressively a decoder should attempt to produce progressive
/// previews while bytes are still streaming in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPolicy {
    Disabled,
    Incremental,
    Thumbnail,
    DefaultForFormat,
}

/// Context passed to a `DecoderFactory` when selecting a decoder for a
/// request.
pub struct DecoderContext<'a> {
    pub request: &'a ImageRequest,
    pub is_final: bool,
}

/// A (possibly stateful, for progressive formats) decoder instance bound to
/// a single original-image task. `decode_partial` may be called repeatedly
/// as more bytes arrive; `decode` is called exactly once, with the complete
/// payload.
pub trait Decoder: Send {
    /// Decode the complete byte payload into a final container.
    fn decode(&mut self, bytes: &[u8]) -> Result<ImageContainer, ImagePipelineError>;

    /// Attempt to decode a preview from a byte prefix. Returns `None` when no
    /// preview can be produced yet under the configured preview policy. The
    /// pipeline guarantees this is called with a monotonically growing
    /// prefix; implementations may rely on that to bound the number of
    /// previews they emit.
    fn decode_partial(&mut self, bytes: &[u8]) -> Option<ImageContainer>;
}

/// Factory selecting (and constructing) a `Decoder` for a request. An
/// ordered list of factories forms the `DecoderRegistry`; the first one
/// willing to handle the data wins.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, ctx: &DecoderContext<'_>, data: &[u8]) -> Option<Box<dyn Decoder>>;
}

/// Ordered registry of decoder factories.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    factories: Vec<Arc<dyn DecoderFactory>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self { factories: Vec::new() }
    }

    pub fn register(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// First match wins.
    pub fn create(&self, ctx: &DecoderContext<'_>, data: &[u8]) -> Option<Box<dyn Decoder>> {
        self.factories.iter().find_map(|f| f.create(ctx, data))
    }

    /// A registry with only the in-tree reference decoder registered.
    pub fn with_reference_decoder(preview_policy: PreviewPolicy) -> Self {
        Self::new().register(Arc::new(ReferenceDecoderFactory { preview_policy }))
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecoderRegistry({} factories)", self.factories.len())
    }
}

/// Context passed to a `Processor`. `is_final` distinguishes a terminal
/// decode from a progressive preview scan; only processors that opt into
/// `supports_progressive` are invoked when it is `false`.
pub struct ProcessingContext<'a> {
    pub request: &'a ImageRequest,
    pub is_final: bool,
}

/// A single step in a request's processor pipeline. Identity (the
/// `identifier` string) is the sole mechanism that renders processed-image
/// cache keys stable: two processor pipelines are equal iff their ordered
/// identifier lists are equal.
///
/// `Ok(None)` from `process` is only meaningful on a progressive call; see
/// the method docs below.
pub trait Processor: Send + Sync {
    fn identifier(&self) -> &str;

    /// Whether this processor may run against progressive previews, not
    /// just the final decode. Defaults to `false`.
    fn supports_progressive(&self) -> bool {
        false
    }

    /// Transform a container. `Ok(None)` means the processor deliberately
    /// declined to produce output for this scan (only meaningful for
    /// progressive calls); on a final call it is treated as a processing
    /// failure by the caller.
    fn process(
        &self,
        container: &ImageContainer,
        ctx: &ProcessingContext<'_>,
    ) -> Result<Option<ImageContainer>, ImagePipelineError>;
}

/// A cloneable, hashable handle to a `Processor`, used inside `ImageRequest`
/// and as part of cache-key derivation. Equality and hashing are defined
/// purely in terms of `identifier()`.
#[derive(Clone)]
pub struct ProcessorHandle(pub Arc<dyn Processor>);

impl ProcessorHandle {
    pub fn new(processor: impl Processor + 'static) -> Self {
        Self(Arc::new(processor))
    }

    pub fn identifier(&self) -> &str {
        self.0.identifier()
    }
}

impl fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessorHandle({})", self.identifier())
    }
}

impl PartialEq for ProcessorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.identifier() == other.identifier()
    }
}
impl Eq for ProcessorHandle {}

impl Hash for ProcessorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier().hash(state);
    }
}

impl std::ops::Deref for ProcessorHandle {
    type Target = dyn Processor;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// `encode(container) → bytes?`. Chooses its output format heuristically;
/// the reference implementation just re-emits whatever raw bytes the
/// container carries.
pub trait Encoder: Send + Sync {
    fn encode(&self, container: &ImageContainer) -> Option<Vec<u8>>;
}

/// Reference encoder: re-emits the container's original raw bytes
/// unchanged, or `None` if the container carries none (e.g. it was produced
/// by a processor that didn't retain raw bytes).
#[derive(Debug, Default)]
pub struct PassthroughEncoder;

impl Encoder for PassthroughEncoder {
    fn encode(&self, container: &ImageContainer) -> Option<Vec<u8>> {
        container.raw_data.as_ref().map(|b| b.as_ref().clone())
    }
}

// ---------------------------------------------------------------------
// Reference decoder
// ---------------------------------------------------------------------

/// A stateful reference decoder. It does not perform a real image decode;
/// it sniffs the format from magic bytes and fabricates a pixel size from
/// the byte length so the rest of the pipeline (caching, cost accounting,
/// processors) has something real to operate on. Preview emission is
/// bounded at 3 scans and strictly monotonic in the number of bytes seen.
pub struct ReferenceDecoder {
    preview_policy: PreviewPolicy,
    previews_emitted: u32,
    last_seen_len: usize,
}

const MAX_REFERENCE_PREVIEWS: u32 = 3;
/// Minimum additional bytes between previews, so a decoder fed tiny chunks
/// doesn't emit a preview for every single chunk.
const PREVIEW_STRIDE_BYTES: usize = 4096;

impl ReferenceDecoder {
    pub fn new(preview_policy: PreviewPolicy) -> Self {
        Self { preview_policy, previews_emitted: 0, last_seen_len: 0 }
    }

    fn fabricate_size(bytes: &[u8]) -> ImageSize {
        // Deterministic, non-zero "dimensions" derived from the payload
        // length. Not a real decode, just enough signal for cost accounting
        // and resize processors to have something to do.
        let side = ((bytes.len() as f64).sqrt().max(1.0)) as u32;
        ImageSize { width: side.max(1), height: side.max(1) }
    }
}

impl Decoder for ReferenceDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<ImageContainer, ImagePipelineError> {
        if bytes.is_empty() {
            return Err(ImagePipelineError::DataIsEmpty);
        }
        let format = ImageFormat::sniff(bytes);
        let size = Self::fabricate_size(bytes);
        Ok(ImageContainer::new(size, format).with_raw_data(Arc::new(bytes.to_vec())))
    }

    fn decode_partial(&mut self, bytes: &[u8]) -> Option<ImageContainer> {
        if self.preview_policy == PreviewPolicy::Disabled {
            return None;
        }
        if self.previews_emitted >= MAX_REFERENCE_PREVIEWS {
            return None;
        }
        if bytes.len() < self.last_seen_len + PREVIEW_STRIDE_BYTES {
            return None;
        }
        if bytes.len() < 16 {
            return None;
        }
        self.last_seen_len = bytes.len();
        self.previews_emitted += 1;
        let format = ImageFormat::sniff(bytes);
        let size = match self.preview_policy {
            PreviewPolicy::Thumbnail => ImageSize { width: 32, height: 32 },
            _ => Self::fabricate_size(bytes),
        };
        Some(ImageContainer::new(size, format).as_preview())
    }
}

/// Factory producing [`ReferenceDecoder`] instances. Matches any data
/// whose format can be sniffed as PNG/JPEG/GIF/WEBP; unknown formats are
/// left unmatched so a registry with more specific factories ahead of this
/// one can claim them, and a registry with only this factory reports
/// `decoder-not-registered` for genuinely unrecognized data.
pub struct ReferenceDecoderFactory {
    pub preview_policy: PreviewPolicy,
}

impl DecoderFactory for ReferenceDecoderFactory {
    fn create(&self, _ctx: &DecoderContext<'_>, data: &[u8]) -> Option<Box<dyn Decoder>> {
        if data.is_empty() || ImageFormat::sniff(data) == ImageFormat::Unknown {
            return None;
        }
        Some(Box::new(ReferenceDecoder::new(self.preview_policy)))
    }
}

// ---------------------------------------------------------------------
// Reference processors
// ---------------------------------------------------------------------

/// No-op processor. Useful as a default pipeline entry and in tests that
/// want a stable, cheap identifier.
#[derive(Debug, Default)]
pub struct IdentityProcessor;

impl Processor for IdentityProcessor {
    fn identifier(&self) -> &str {
        "identity"
    }

    fn supports_progressive(&self) -> bool {
        true
    }

    fn process(
        &self,
        container: &ImageContainer,
        _ctx: &ProcessingContext<'_>,
    ) -> Result<Option<ImageContainer>, ImagePipelineError> {
        Ok(Some(container.clone()))
    }
}

/// Resizes (in the fabricated-dimensions sense the reference decoder uses)
/// to a fixed target size. The identifier encodes the target so two resize
/// processors to different sizes derive distinct cache keys.
#[derive(Debug)]
pub struct ResizeProcessor {
    target: ImageSize,
    identifier: String,
    progressive: bool,
}

impl ResizeProcessor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            target: ImageSize { width, height },
            identifier: format!("resize({width}x{height})"),
            progressive: false,
        }
    }

    pub fn progressive(mut self, enabled: bool) -> Self {
        self.progressive = enabled;
        self
    }
}

impl Processor for ResizeProcessor {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn supports_progressive(&self) -> bool {
        self.progressive
    }

    fn process(
        &self,
        container: &ImageContainer,
        _ctx: &ProcessingContext<'_>,
    ) -> Result<Option<ImageContainer>, ImagePipelineError> {
        if container.size.width == 0 || container.size.height == 0 {
            return Err(ImagePipelineError::processing_failed(SimpleError::new(
                "cannot resize a zero-sized container",
            )));
        }
        let mut out = container.clone();
        out.size = self.target;
        Ok(Some(out))
    }
}
