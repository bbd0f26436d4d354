//! Transport abstraction for fetching original image bytes.
//!
//! The default [`HttpDataLoader`] is a thin `reqwest` wrapper that honors
//! resumable downloads: it keeps its own [`ResumableDataStore`] keyed by
//! URL, consulting it before each request and topping it up whenever a
//! stream ends early with at least an `ETag`/`Last-Modified` validator to
//! anchor a future `If-Range`. The next `load` for the same URL picks the
//! buffer back up automatically.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, ETAG, IF_RANGE, LAST_MODIFIED, RANGE};
use tracing::debug;

use crate::error::ImagePipelineError;
use crate::rate_limiter::RateLimiter;
use crate::request::{CachePolicy, HttpMethod, NetworkRequest};
use crate::resumable::{ResumableDataStore, Validator};

/// Bytes (and provenance) produced by a completed load.
pub struct LoadedData {
    pub bytes: Vec<u8>,
    pub validator: Option<Validator>,
    pub total_bytes: Option<u64>,
}

/// Callback invoked as bytes accumulate; receives cumulative progress.
pub type ProgressCallback<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);
/// Callback invoked with the full cumulative buffer each time new bytes
/// arrive, so a caller can feed a progressive decoder.
pub type ChunkCallback<'a> = &'a (dyn Fn(&[u8]) + Send + Sync);

#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(
        &self,
        request: &NetworkRequest,
        on_progress: ProgressCallback<'_>,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<LoadedData, ImagePipelineError>;
}

pub struct HttpDataLoader {
    client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    resumable: Arc<ResumableDataStore>,
    rate_limiter_enabled: bool,
    resumable_enabled: bool,
}

impl HttpDataLoader {
    pub fn new(client: reqwest::Client, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            rate_limiter,
            resumable: Arc::new(ResumableDataStore::new()),
            rate_limiter_enabled: true,
            resumable_enabled: true,
        }
    }

    pub fn with_resumable_store(mut self, store: Arc<ResumableDataStore>) -> Self {
        self.resumable = store;
        self
    }

    /// Gate outbound requests on the shared [`RateLimiter`]. Disabled
    /// pipelines still hold a limiter (cheap to construct) but skip the
    /// `acquire` wait entirely.
    pub fn with_rate_limiter_enabled(mut self, enabled: bool) -> Self {
        self.rate_limiter_enabled = enabled;
        self
    }

    /// Gate the resumable-download lookup/store calls. Disabled pipelines
    /// never consult or populate the `ResumableDataStore`, so an
    /// interrupted download always restarts from scratch.
    pub fn with_resumable_enabled(mut self, enabled: bool) -> Self {
        self.resumable_enabled = enabled;
        self
    }
}

impl Default for HttpDataLoader {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), Arc::new(RateLimiter::default()))
    }
}

fn validator_from_headers(headers: &reqwest::header::HeaderMap) -> Option<Validator> {
    if let Some(etag) = headers.get(ETAG).and_then(|v| v.to_str().ok()) {
        return Some(Validator::ETag(etag.to_string()));
    }
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(|v| Validator::LastModified(v.to_string()))
}

#[async_trait]
impl DataLoader for HttpDataLoader {
    async fn load(
        &self,
        request: &NetworkRequest,
        on_progress: ProgressCallback<'_>,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<LoadedData, ImagePipelineError> {
        if self.rate_limiter_enabled {
            self.rate_limiter.acquire().await;
        }

        let url_str = request.url.as_str().to_string();
        let resume = if self.resumable_enabled { self.resumable.take(&url_str) } else { None };

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        };
        let mut builder = self.client.request(method, request.url.clone());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if matches!(request.cache_policy, CachePolicy::ReloadIgnoringCache) {
            builder = builder.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }

        let mut prefix = Vec::new();
        let mut resume_validator = None;
        if let Some(ref data) = resume {
            builder = builder.header(RANGE, format!("bytes={}-", data.bytes.len()));
            let if_range = match &data.validator {
                Validator::ETag(tag) => tag.clone(),
                Validator::LastModified(date) => date.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&if_range) {
                builder = builder.header(IF_RANGE, value);
            }
            prefix = data.bytes.clone();
            resume_validator = Some(data.validator.clone());
        }

        let response = match builder.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(err) => {
                if self.resumable_enabled {
                    if let (Some(validator), false) = (resume_validator, prefix.is_empty()) {
                        self.resumable.store(&url_str, prefix, validator);
                    }
                }
                return Err(ImagePipelineError::data_loading_failed(err));
            }
        };

        let resumed = !prefix.is_empty() && response.status() == reqwest::StatusCode::PARTIAL_CONTENT;
        if !prefix.is_empty() && !resumed {
            debug!(url = %request.url, "server did not honor range request, restarting download");
            prefix.clear();
        }

        let total_bytes = response.content_length().map(|len| len + prefix.len() as u64);
        let validator = validator_from_headers(response.headers());

        let mut buffer = prefix;
        let mut stream = response.bytes_stream();
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    on_chunk(&buffer);
                    if let Some(total) = total_bytes {
                        on_progress(buffer.len() as u64, total);
                    }
                }
                Some(Err(err)) => {
                    if self.resumable_enabled {
                        if let Some(validator) = validator.clone() {
                            self.resumable.store(&url_str, buffer, validator);
                        }
                    }
                    return Err(ImagePipelineError::data_loading_failed(err));
                }
                None => break,
            }
        }

        if buffer.is_empty() {
            return Err(ImagePipelineError::DataIsEmpty);
        }
        Ok(LoadedData { bytes: buffer, validator, total_bytes })
    }
}

/// A `DataLoader` that serves bytes from an in-memory map, for tests and
/// examples that shouldn't depend on network access. Counts every `load`
/// call so dedup tests can assert a request was actually fetched once.
pub struct StaticDataLoader {
    entries: dashmap::DashMap<String, Vec<u8>>,
    call_count: std::sync::atomic::AtomicUsize,
}

impl StaticDataLoader {
    pub fn new() -> Self {
        Self { entries: dashmap::DashMap::new(), call_count: std::sync::atomic::AtomicUsize::new(0) }
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(url.into(), bytes);
    }

    /// Number of times `load` has been called so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for StaticDataLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataLoader for StaticDataLoader {
    async fn load(
        &self,
        request: &NetworkRequest,
        on_progress: ProgressCallback<'_>,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<LoadedData, ImagePipelineError> {
        self.call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let bytes = self
            .entries
            .get(request.url.as_str())
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                ImagePipelineError::data_loading_failed(crate::error::SimpleError::new(format!(
                    "no static entry for {}",
                    request.url
                )))
            })?;
        if bytes.is_empty() {
            return Err(ImagePipelineError::DataIsEmpty);
        }
        on_chunk(&bytes);
        on_progress(bytes.len() as u64, bytes.len() as u64);
        Ok(LoadedData { bytes: bytes.clone(), validator: None, total_bytes: Some(bytes.len() as u64) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn static_loader_serves_registered_bytes() {
        let loader = StaticDataLoader::new();
        loader.insert("https://e.com/a.png", vec![1, 2, 3]);
        let request = NetworkRequest::new(Url::parse("https://e.com/a.png").unwrap());
        let result = loader.load(&request, &|_, _| {}, &|_| {}).await.unwrap();
        assert_eq!(result.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn static_loader_errors_on_missing_entry() {
        let loader = StaticDataLoader::new();
        let request = NetworkRequest::new(Url::parse("https://e.com/missing.png").unwrap());
        let result = loader.load(&request, &|_, _| {}, &|_| {}).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn static_loader_counts_every_load_call() {
        let loader = StaticDataLoader::new();
        loader.insert("https://e.com/a.png", vec![1, 2, 3]);
        let request = NetworkRequest::new(Url::parse("https://e.com/a.png").unwrap());
        assert_eq!(loader.call_count(), 0);
        loader.load(&request, &|_, _| {}, &|_| {}).await.unwrap();
        loader.load(&request, &|_, _| {}, &|_| {}).await.unwrap();
        assert_eq!(loader.call_count(), 2);
    }
}
