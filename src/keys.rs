//! Cache and deduplication key derivation.
//!
//! Four distinct keys are derived from an `ImageRequest`, each coalescing
//! requests along a different equivalence: a data fetch only cares about
//! the network request; a processed-image load additionally cares about the
//! processor pipeline; the disk cache additionally cares about the caller's
//! image identifier and storage policy.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::request::{CachePolicy as DiskStoragePolicy, ImageRequest};

/// Key under which a decoded, processed `ImageContainer` is stored in the
/// in-memory cache. Two requests share a memory-cache entry iff they agree
/// on image identifier, processor pipeline, and load-originals-only flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryCacheKey {
    image_id: String,
    processor_ids: Vec<String>,
}

impl MemoryCacheKey {
    pub fn for_request(request: &ImageRequest) -> Self {
        Self {
            image_id: request.image_id(),
            processor_ids: request.processors().iter().map(|p| p.identifier().to_string()).collect(),
        }
    }
}

/// Key deduplicating in-flight processed-image tasks. Distinct from
/// [`MemoryCacheKey`] in spirit only (it coalesces tasks, not cache
/// entries), but the derivation is identical, so it wraps the same fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedImageLoadKey(MemoryCacheKey);

impl ProcessedImageLoadKey {
    pub fn for_request(request: &ImageRequest) -> Self {
        Self(MemoryCacheKey::for_request(request))
    }
}

/// Key deduplicating in-flight original (undecoded-bytes) fetches. Only the
/// network-level description of the request matters: two requests with
/// different processor pipelines, but an identical `NetworkRequest`, share a
/// single data fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginalImageLoadKey {
    network_request_hash: u64,
}

impl OriginalImageLoadKey {
    pub fn for_request(request: &ImageRequest) -> Self {
        let mut hasher = DefaultHasher::new();
        request.source().hash(&mut hasher);
        Self { network_request_hash: hasher.finish() }
    }
}

/// What a disk-cache entry's filename is keyed on, resolved from
/// `DataCachePolicy::Automatic` down to one of the three concrete modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolvedDiskPolicy {
    /// Keyed on the original-image load key alone: every request for the
    /// same bytes shares one entry regardless of processors.
    StoredIds,
    /// Keyed on image identifier plus processor pipeline: each distinct
    /// processed variant gets its own entry.
    StoredIdsAndProcessed,
    /// Keyed on the raw, undecoded original bytes alone, independent of
    /// image identifier or processor pipeline. Used for the data-fetch
    /// write-through, which happens before any processor pipeline exists.
    OriginalData,
}

/// Mirrors [`crate::config::DataCachePolicy`] without creating a dependency
/// cycle between `keys` and `config`; `config` converts into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCachePolicy {
    StoredIds,
    StoredIdsAndProcessed,
    /// Behaves as `StoredIdsAndProcessed` when the request carries any
    /// processors, else as `StoredIds`.
    Automatic,
    /// The original, undecoded bytes for a request's network source,
    /// independent of the caller's image identifier or processor pipeline.
    OriginalData,
}

impl DataCachePolicy {
    fn resolve(self, request: &ImageRequest) -> ResolvedDiskPolicy {
        match self {
            DataCachePolicy::StoredIds => ResolvedDiskPolicy::StoredIds,
            DataCachePolicy::StoredIdsAndProcessed => ResolvedDiskPolicy::StoredIdsAndProcessed,
            DataCachePolicy::OriginalData => ResolvedDiskPolicy::OriginalData,
            DataCachePolicy::Automatic => {
                if request.processors().is_empty() {
                    ResolvedDiskPolicy::StoredIds
                } else {
                    ResolvedDiskPolicy::StoredIdsAndProcessed
                }
            }
        }
    }
}

/// Key used to derive the on-disk filename for a cached entry. The
/// `_cache_policy` field on the request only affects upstream HTTP
/// behavior, not this derivation; it is deliberately unused here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiskCacheKey {
    image_id: String,
    processor_ids: Vec<String>,
    originals_only: bool,
}

impl DiskCacheKey {
    pub fn for_request(request: &ImageRequest, policy: DataCachePolicy) -> Self {
        match policy.resolve(request) {
            ResolvedDiskPolicy::StoredIds => Self {
                image_id: request.image_id(),
                processor_ids: Vec::new(),
                originals_only: false,
            },
            ResolvedDiskPolicy::StoredIdsAndProcessed => Self {
                image_id: request.image_id(),
                processor_ids: request.processors().iter().map(|p| p.identifier().to_string()).collect(),
                originals_only: false,
            },
            ResolvedDiskPolicy::OriginalData => Self {
                image_id: request.image_id(),
                processor_ids: Vec::new(),
                originals_only: true,
            },
        }
    }

    /// A stable string suitable for feeding to a filename generator (e.g.
    /// SHA-1 of this string).
    pub fn as_canonical_string(&self) -> String {
        if self.originals_only {
            format!("{}?original", self.image_id)
        } else if self.processor_ids.is_empty() {
            self.image_id.clone()
        } else {
            format!("{}?processors={}", self.image_id, self.processor_ids.join(","))
        }
    }
}

// Reconcile the two CachePolicy-flavored types: `crate::request::CachePolicy`
// is the unrelated upstream-HTTP cache policy, imported above only to make
// the doc comment's disambiguation explicit in rustdoc output.
#[allow(dead_code)]
fn _assert_distinct(_: DiskStoragePolicy) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IdentityProcessor, ProcessorHandle, ResizeProcessor};
    use url::Url;

    fn req(url: &str) -> ImageRequest {
        ImageRequest::new(Url::parse(url).unwrap())
    }

    #[test]
    fn memory_cache_key_ignores_network_cache_policy() {
        let a = req("https://example.com/a.png");
        let b = ImageRequest::from_network_request({
            let mut n = a.source().clone();
            n.cache_policy = crate::request::CachePolicy::ReloadIgnoringCache;
            n
        });
        assert_eq!(MemoryCacheKey::for_request(&a), MemoryCacheKey::for_request(&b));
    }

    #[test]
    fn memory_cache_key_distinguishes_processors() {
        let base = req("https://example.com/a.png");
        let with_resize = base.clone().with_processors(vec![ProcessorHandle::new(ResizeProcessor::new(50, 50))]);
        assert_ne!(MemoryCacheKey::for_request(&base), MemoryCacheKey::for_request(&with_resize));
    }

    #[test]
    fn original_load_key_ignores_processors() {
        let base = req("https://example.com/a.png");
        let with_identity = base.clone().with_processors(vec![ProcessorHandle::new(IdentityProcessor)]);
        assert_eq!(
            OriginalImageLoadKey::for_request(&base),
            OriginalImageLoadKey::for_request(&with_identity)
        );
    }

    #[test]
    fn disk_key_automatic_matches_stored_ids_without_processors() {
        let plain = req("https://example.com/a.png");
        let explicit = DiskCacheKey::for_request(&plain, DataCachePolicy::StoredIds);
        let automatic = DiskCacheKey::for_request(&plain, DataCachePolicy::Automatic);
        assert_eq!(explicit, automatic);
    }

    #[test]
    fn disk_key_automatic_matches_stored_ids_and_processed_with_processors() {
        let with_resize = req("https://example.com/a.png")
            .with_processors(vec![ProcessorHandle::new(ResizeProcessor::new(10, 10))]);
        let explicit = DiskCacheKey::for_request(&with_resize, DataCachePolicy::StoredIdsAndProcessed);
        let automatic = DiskCacheKey::for_request(&with_resize, DataCachePolicy::Automatic);
        assert_eq!(explicit, automatic);
    }

    #[test]
    fn original_data_key_ignores_processors_and_differs_from_stored_ids() {
        let base = req("https://example.com/a.png");
        let with_resize = base.clone().with_processors(vec![ProcessorHandle::new(ResizeProcessor::new(10, 10))]);
        let plain_original = DiskCacheKey::for_request(&base, DataCachePolicy::OriginalData);
        let processed_original = DiskCacheKey::for_request(&with_resize, DataCachePolicy::OriginalData);
        assert_eq!(plain_original, processed_original);
        assert_ne!(plain_original, DiskCacheKey::for_request(&base, DataCachePolicy::StoredIds));
    }
}
