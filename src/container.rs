//! `ImageContainer` and `ImageResponse`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::request::{ImageRequest, UserInfoValue};

/// Tag identifying the encoded format a container's bytes (if any) were
/// decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Heic,
    Webp,
    Unknown,
}

impl ImageFormat {
    /// Sniff a format from the leading magic bytes of a buffer. This is the
    /// extent of "decoding" the in-tree reference decoder performs; it is
    /// not a claim of bit-exact format support.
    pub fn sniff(bytes: &[u8]) -> ImageFormat {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            ImageFormat::Png
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageFormat::Jpeg
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            ImageFormat::Gif
        } else if bytes.len() > 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            ImageFormat::Webp
        } else {
            ImageFormat::Unknown
        }
    }
}

/// Decoded pixel dimensions. The reference decoder fabricates these from the
/// byte length rather than performing a true decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// A decoded image plus whatever metadata travelled with it through the
/// pipeline. Exclusively owned by its producer; shared read-only once
/// published (wrapped in `Arc`) to caches and subscribers.
#[derive(Debug, Clone)]
pub struct ImageContainer {
    pub size: ImageSize,
    /// Raw encoded bytes, retained for animated formats and for the
    /// originals-mode disk cache write-through.
    pub raw_data: Option<Arc<Vec<u8>>>,
    pub format: ImageFormat,
    pub is_preview: bool,
    pub user_info: HashMap<String, UserInfoValue>,
}

impl ImageContainer {
    pub fn new(size: ImageSize, format: ImageFormat) -> Self {
        Self {
            size,
            raw_data: None,
            format,
            is_preview: false,
            user_info: HashMap::new(),
        }
    }

    pub fn with_raw_data(mut self, data: Arc<Vec<u8>>) -> Self {
        self.raw_data = Some(data);
        self
    }

    pub fn as_preview(mut self) -> Self {
        self.is_preview = true;
        self
    }

    /// Cost used by the memory cache: pixel bytes (4 bytes/pixel, matching
    /// an RGBA8 in-memory representation) plus any attached raw bytes.
    pub fn cost(&self) -> u64 {
        let pixels = self.size.width as u64 * self.size.height as u64 * 4;
        let raw = self.raw_data.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        pixels + raw
    }
}

/// Where an `ImageResponse` was ultimately produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Memory,
    Disk,
    Network,
    /// A partially decoded preview; more responses for this request follow.
    NetworkPreview,
}

/// An `ImageContainer` plus the originating request and provenance.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub container: Arc<ImageContainer>,
    pub request: ImageRequest,
    pub source: ResponseSource,
}

impl ImageResponse {
    pub fn is_preview(&self) -> bool {
        self.container.is_preview
    }
}

/// Raw-bytes response returned by `ImagePipeline::load_data`, bypassing
/// decode/process.
#[derive(Debug, Clone)]
pub struct DataResponse {
    pub bytes: Arc<Vec<u8>>,
    pub request: ImageRequest,
    pub source: ResponseSource,
}
