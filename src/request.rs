//! `ImageRequest` and the small value types that make it up.
//!
//! The request is a cheap-to-clone, copy-on-write value: cloning an
//! `ImageRequest` shares the inner state until one of the clones is mutated,
//! at which point `Arc::make_mut` clones the inner value for that holder
//! only. In-flight tasks built from an earlier snapshot are unaffected by
//! later mutation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::codec::ProcessorHandle;

/// Five-level request priority. `Ord` is derived in declaration order so
/// `max()` over an iterator of priorities does the right thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// Collapse the five-level priority onto the three work-queue buckets
    /// used by `WorkQueue`.
    pub fn to_bucket(self) -> crate::queue::QueueBucket {
        use crate::queue::QueueBucket;
        match self {
            Priority::VeryLow | Priority::Low => QueueBucket::Low,
            Priority::Normal => QueueBucket::Normal,
            Priority::High | Priority::VeryHigh => QueueBucket::High,
        }
    }
}

/// HTTP method used for the underlying network fetch. Only the subset the
/// pipeline itself cares about is modeled; the default `DataLoader`
/// implementation always uses `Get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
}

/// How the request should interact with any upstream HTTP caches (CDN,
/// browser-style caches in front of the data loader). This is distinct from
/// the pipeline's own memory/disk caches, which are controlled by
/// [`RequestOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Respect whatever caching the transport/protocol would normally apply.
    UseProtocolCachePolicy,
    /// Bypass upstream caches entirely.
    ReloadIgnoringCache,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::UseProtocolCachePolicy
    }
}

/// The network-level description of where bytes come from. Two requests
/// that agree on every field here coalesce into a single data-fetch task
/// (the original-image-load key), regardless of what processors or
/// `imageId` they carry.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub cache_policy: CachePolicy,
    pub allows_cellular: bool,
    pub timeout: Option<Duration>,
}

impl NetworkRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: HttpMethod::Get,
            cache_policy: CachePolicy::default(),
            allows_cellular: true,
            timeout: None,
        }
    }
}

impl PartialEq for NetworkRequest {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.method == other.method
            && self.cache_policy == other.cache_policy
            && self.allows_cellular == other.allows_cellular
            && self.timeout == other.timeout
    }
}
impl Eq for NetworkRequest {}

impl std::hash::Hash for NetworkRequest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.as_str().hash(state);
        (self.method == HttpMethod::Get).hash(state);
        matches!(self.cache_policy, CachePolicy::UseProtocolCachePolicy).hash(state);
        self.allows_cellular.hash(state);
        self.timeout.hash(state);
    }
}

/// Flags controlling how a single request interacts with the memory and disk
/// caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RequestOptions {
    pub reload_ignoring_cached_data: bool,
    pub disable_memory_cache_reads: bool,
    pub disable_memory_cache_writes: bool,
    pub disable_disk_cache_reads: bool,
    pub disable_disk_cache_writes: bool,
}

/// Free-form values a caller can attach to a request's user-info map.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInfoValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl fmt::Display for UserInfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserInfoValue::Text(s) => write!(f, "{s}"),
            UserInfoValue::Number(n) => write!(f, "{n}"),
            UserInfoValue::Flag(b) => write!(f, "{b}"),
        }
    }
}

/// The well-known user-info key the pipeline looks at directly to derive an
/// image identifier distinct from the request URL.
pub const IMAGE_ID_KEY: &str = "imageId";
/// A user-info key that overrides the image identifier used for cache keys
/// without affecting the network fetch, letting two URLs that differ only in
/// transient query parameters share a cache entry.
pub const FILTERED_IMAGE_ID_KEY: &str = "filteredImageId";

#[derive(Clone)]
struct ImageRequestInner {
    source: NetworkRequest,
    processors: Vec<ProcessorHandle>,
    priority: Priority,
    options: RequestOptions,
    user_info: HashMap<String, UserInfoValue>,
}

impl fmt::Debug for ImageRequestInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequestInner")
            .field("source", &self.source)
            .field("processors", &self.processors.iter().map(|p| p.identifier()).collect::<Vec<_>>())
            .field("priority", &self.priority)
            .field("options", &self.options)
            .field("user_info", &self.user_info)
            .finish()
    }
}

/// A request to load, decode and process an image. Cheap to clone; see the
/// module docs for the copy-on-write contract.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    inner: Arc<ImageRequestInner>,
}

impl ImageRequest {
    pub fn new(url: Url) -> Self {
        Self {
            inner: Arc::new(ImageRequestInner {
                source: NetworkRequest::new(url),
                processors: Vec::new(),
                priority: Priority::default(),
                options: RequestOptions::default(),
                user_info: HashMap::new(),
            }),
        }
    }

    pub fn from_network_request(source: NetworkRequest) -> Self {
        Self {
            inner: Arc::new(ImageRequestInner {
                source,
                processors: Vec::new(),
                priority: Priority::default(),
                options: RequestOptions::default(),
                user_info: HashMap::new(),
            }),
        }
    }

    pub fn source(&self) -> &NetworkRequest {
        &self.inner.source
    }

    pub fn url(&self) -> &Url {
        &self.inner.source.url
    }

    pub fn processors(&self) -> &[ProcessorHandle] {
        &self.inner.processors
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn options(&self) -> RequestOptions {
        self.inner.options
    }

    pub fn user_info(&self) -> &HashMap<String, UserInfoValue> {
        &self.inner.user_info
    }

    /// Returns a logically new request with the given processor pipeline.
    /// Existing in-flight tasks built from `self` are unaffected.
    pub fn with_processors(mut self, processors: Vec<ProcessorHandle>) -> Self {
        Arc::make_mut(&mut self.inner).processors = processors;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        Arc::make_mut(&mut self.inner).priority = priority;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        Arc::make_mut(&mut self.inner).options = options;
        self
    }

    pub fn with_user_info(mut self, key: impl Into<String>, value: UserInfoValue) -> Self {
        Arc::make_mut(&mut self.inner).user_info.insert(key.into(), value);
        self
    }

    /// The image identifier used for cache keys: `filteredImageId` if
    /// present, else `imageId`, else the request URL's absolute string.
    pub fn image_id(&self) -> String {
        if let Some(UserInfoValue::Text(v)) = self.inner.user_info.get(FILTERED_IMAGE_ID_KEY) {
            return v.clone();
        }
        if let Some(UserInfoValue::Text(v)) = self.inner.user_info.get(IMAGE_ID_KEY) {
            return v.clone();
        }
        self.inner.source.url.as_str().to_string()
    }
}
