//! Error taxonomy for the image pipeline.

use std::fmt;
use std::sync::Arc;

/// Opaque error surface returned by every fallible pipeline operation.
///
/// Variants are deliberately coarse: the pipeline classifies failures for the
/// caller but never attempts to retry them. A caller wanting a retry submits a
/// new request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImagePipelineError {
    /// A cache-read-only request missed the cache.
    #[error("data missing in cache")]
    DataMissingInCache,

    /// The data loader failed to transport bytes.
    #[error("data loading failed: {0}")]
    DataLoadingFailed(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The loader completed with zero bytes.
    #[error("data is empty")]
    DataIsEmpty,

    /// No registered decoder matched the request/data.
    #[error("no decoder registered for this data")]
    DecoderNotRegistered,

    /// The decoder rejected the bytes it was given.
    #[error("decoding failed: {0}")]
    DecodingFailed(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A processor returned absent or failed.
    #[error("processing failed: {0}")]
    ProcessingFailed(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A caller passed an absent/invalid request.
    #[error("image request missing")]
    ImageRequestMissing,

    /// Internal cancellation signal. Not normally surfaced to callers: a
    /// cancelled task simply never emits a terminal event.
    #[error("cancelled")]
    Cancelled,
}

impl ImagePipelineError {
    pub fn data_loading_failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::DataLoadingFailed(Arc::new(err))
    }

    pub fn decoding_failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::DecodingFailed(Arc::new(err))
    }

    pub fn processing_failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::ProcessingFailed(Arc::new(err))
    }

    /// True for the internal cancellation signal, which callers generally
    /// should not treat as a reportable failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A boxed, string-only error used by the in-tree reference codecs, where a
/// full error type would be overkill.
#[derive(Debug, Clone)]
pub struct SimpleError(pub String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SimpleError {}

impl SimpleError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ImagePipelineError>;
