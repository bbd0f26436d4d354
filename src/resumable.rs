//! Tracks partially-downloaded bytes per URL so an interrupted fetch can
//! resume with a `Range` request instead of restarting from zero.
//!
//! Entries are validated with whatever the server supplied (`ETag` or
//! `Last-Modified`); a resume request is only issued `If-Range` that
//! validator, so a server that can't honor it safely falls back to a full
//! response instead of silently splicing mismatched bytes.

use std::collections::HashMap;

use parking_lot::Mutex;

/// The minimum number of buffered bytes worth resuming with a `Range`
/// request rather than just restarting; below this, the HTTP round trip
/// isn't worth saving.
pub const MIN_RESUMABLE_BYTES: usize = 32 * 1024;

/// Maximum number of in-flight resumable entries retained at once.
const MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    ETag(String),
    LastModified(String),
}

#[derive(Debug, Clone)]
pub struct ResumableData {
    pub bytes: Vec<u8>,
    pub validator: Validator,
}

struct Entry {
    data: ResumableData,
    tick: u64,
}

/// A bounded, LRU-evicted map from URL to resumable byte buffer.
pub struct ResumableDataStore {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    next_tick: u64,
}

impl Default for ResumableDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumableDataStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { entries: HashMap::new(), next_tick: 0 }) }
    }

    /// Record (or overwrite) bytes buffered so far for `url`. Buffers
    /// shorter than [`MIN_RESUMABLE_BYTES`] are not worth keeping.
    pub fn store(&self, url: &str, bytes: Vec<u8>, validator: Validator) {
        if bytes.len() < MIN_RESUMABLE_BYTES {
            return;
        }
        let mut inner = self.inner.lock();
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.entries.insert(url.to_string(), Entry { data: ResumableData { bytes, validator }, tick });

        if inner.entries.len() > MAX_ENTRIES {
            if let Some(lru_url) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.tick)
                .map(|(u, _)| u.clone())
            {
                inner.entries.remove(&lru_url);
            }
        }
    }

    /// Take the buffered data for `url`, if any, removing it from the
    /// store: a resume attempt consumes the checkpoint regardless of
    /// whether the server honors it.
    pub fn take(&self, url: &str) -> Option<ResumableData> {
        self.inner.lock().entries.remove(url).map(|e| e.data)
    }

    pub fn remove(&self, url: &str) {
        self.inner.lock().entries.remove(url);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffers_are_not_stored() {
        let store = ResumableDataStore::new();
        store.store("https://e.com/a", vec![0; 10], Validator::ETag("x".into()));
        assert!(store.is_empty());
    }

    #[test]
    fn store_then_take_round_trips() {
        let store = ResumableDataStore::new();
        let bytes = vec![1u8; MIN_RESUMABLE_BYTES];
        store.store("https://e.com/a", bytes.clone(), Validator::ETag("v1".into()));
        let taken = store.take("https://e.com/a").unwrap();
        assert_eq!(taken.bytes, bytes);
        assert_eq!(taken.validator, Validator::ETag("v1".into()));
        assert!(store.take("https://e.com/a").is_none());
    }

    #[test]
    fn evicts_least_recently_stored_past_capacity() {
        let store = ResumableDataStore::new();
        let bytes = vec![0u8; MIN_RESUMABLE_BYTES];
        for i in 0..MAX_ENTRIES + 1 {
            store.store(&format!("https://e.com/{i}"), bytes.clone(), Validator::ETag("v".into()));
        }
        assert_eq!(store.len(), MAX_ENTRIES);
        assert!(store.take("https://e.com/0").is_none());
    }
}
