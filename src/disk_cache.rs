//! Write-behind on-disk cache for encoded image bytes.
//!
//! Writes land in an in-memory staging map immediately (so a caller reading
//! its own just-written entry never misses) and are flushed to disk by a
//! periodic background sweep, default every second. When total on-disk size
//! exceeds `size_limit`, the sweep deletes least-recently-accessed files
//! until usage is back down to `sweep_target_fraction` of the limit. Actual
//! disk reads and flush writes are gated by an internal semaphore
//! (`DiskCacheConfig::max_concurrent_io`), this cache's own disk-io queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::keys::DiskCacheKey;

pub const DEFAULT_SIZE_LIMIT_BYTES: u64 = 150 * 1024 * 1024;
pub const DEFAULT_SWEEP_TARGET_FRACTION: f64 = 0.88;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Disk-io-queue bound: how many filesystem reads/writes this cache issues
/// concurrently. Bounded the same way the pipeline actor's other heavy-work
/// queues are, just scoped to this cache rather than the actor, since the
/// cache already owns its own async read/write/sweep paths.
pub const DEFAULT_MAX_CONCURRENT_DISK_IO: usize = 4;

/// Turns a [`DiskCacheKey`] into a filesystem-safe filename. The default
/// generator hashes the key's canonical string with SHA-1, matching the
/// approach of hashing-based disk caches generally: stable, collision-safe
/// in practice, and independent of any characters the key itself contains.
pub trait FilenameGenerator: Send + Sync {
    fn filename(&self, key: &DiskCacheKey) -> String;
}

pub struct Sha1FilenameGenerator;

impl FilenameGenerator for Sha1FilenameGenerator {
    fn filename(&self, key: &DiskCacheKey) -> String {
        let mut hasher = Sha1::new();
        hasher.update(key.as_canonical_string().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    size: u64,
    last_access: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    entries: HashMap<String, IndexEntry>,
}

pub struct DiskCacheConfig {
    pub size_limit: u64,
    pub sweep_target_fraction: f64,
    pub filename_generator: Arc<dyn FilenameGenerator>,
    pub max_concurrent_io: usize,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT_BYTES,
            sweep_target_fraction: DEFAULT_SWEEP_TARGET_FRACTION,
            filename_generator: Arc::new(Sha1FilenameGenerator),
            max_concurrent_io: DEFAULT_MAX_CONCURRENT_DISK_IO,
        }
    }
}

struct Staged {
    data: Arc<Vec<u8>>,
}

pub struct DataCache {
    root: PathBuf,
    config: DiskCacheConfig,
    staging: Mutex<HashMap<String, Staged>>,
    index: Mutex<Index>,
    io_permits: tokio::sync::Semaphore,
}

impl DataCache {
    pub async fn open(root: impl Into<PathBuf>, config: DiskCacheConfig) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let index = match tokio::fs::read(root.join("index.json")).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Index::default(),
        };
        let io_permits = tokio::sync::Semaphore::new(config.max_concurrent_io);
        Ok(Self {
            root,
            config,
            staging: Mutex::new(HashMap::new()),
            index: Mutex::new(index),
            io_permits,
        })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Stage bytes for write-behind. Returns immediately; the entry becomes
    /// durable at the next flush.
    pub fn set(&self, key: &DiskCacheKey, data: Arc<Vec<u8>>) {
        let filename = self.config.filename_generator.filename(key);
        self.staging.lock().insert(filename, Staged { data });
    }

    /// Read an entry, checking the staging map first (so a write is visible
    /// to a reader before it hits disk), then the filesystem.
    pub async fn get(&self, key: &DiskCacheKey) -> Option<Arc<Vec<u8>>> {
        let filename = self.config.filename_generator.filename(key);
        if let Some(staged) = self.staging.lock().get(&filename) {
            return Some(staged.data.clone());
        }
        let _permit = self.io_permits.acquire().await.ok()?;
        let bytes = tokio::fs::read(self.path_for(&filename)).await.ok()?;
        self.touch(&filename, bytes.len() as u64);
        Some(Arc::new(bytes))
    }

    fn touch(&self, filename: &str, size: u64) {
        self.index.lock().entries.insert(
            filename.to_string(),
            IndexEntry { size, last_access: Utc::now() },
        );
    }

    pub fn remove(&self, key: &DiskCacheKey) {
        let filename = self.config.filename_generator.filename(key);
        self.staging.lock().remove(&filename);
        self.index.lock().entries.remove(&filename);
        let path = self.path_for(&filename);
        let _ = std::fs::remove_file(path);
    }

    pub async fn remove_all(&self) -> std::io::Result<()> {
        self.staging.lock().clear();
        self.index.lock().entries.clear();
        let mut read_dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_name() != "index.json" {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    /// Write staged entries to disk, persist the index, and sweep if over
    /// the size limit. Call on a timer; the pipeline actor owns the
    /// schedule.
    pub async fn flush(&self) -> std::io::Result<()> {
        let staged: Vec<(String, Arc<Vec<u8>>)> = {
            let mut staging = self.staging.lock();
            staging.drain().map(|(k, v)| (k, v.data)).collect()
        };
        for (filename, data) in &staged {
            let _permit = self.io_permits.acquire().await.expect("semaphore is never closed");
            tokio::fs::write(self.path_for(filename), data.as_slice()).await?;
            self.touch(filename, data.len() as u64);
            debug!(filename = %filename, bytes = data.len(), "disk cache entry flushed");
        }
        self.persist_index().await?;
        self.sweep_if_needed().await?;
        Ok(())
    }

    async fn persist_index(&self) -> std::io::Result<()> {
        let json = {
            let index = self.index.lock();
            serde_json::to_vec(&*index).unwrap_or_default()
        };
        tokio::fs::write(self.root.join("index.json"), json).await
    }

    async fn sweep_if_needed(&self) -> std::io::Result<()> {
        let total: u64 = self.index.lock().entries.values().map(|e| e.size).sum();
        if total <= self.config.size_limit {
            return Ok(());
        }
        let target = (self.config.size_limit as f64 * self.config.sweep_target_fraction) as u64;
        let mut ordered: Vec<(String, IndexEntry)> = {
            let index = self.index.lock();
            index.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        ordered.sort_by_key(|(_, e)| e.last_access);

        let mut remaining = total;
        let mut evicted = 0usize;
        for (filename, entry) in ordered {
            if remaining <= target {
                break;
            }
            let path = self.path_for(&filename);
            if tokio::fs::remove_file(&path).await.is_ok() {
                self.index.lock().entries.remove(&filename);
                remaining = remaining.saturating_sub(entry.size);
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, remaining_bytes = remaining, "disk cache sweep evicted entries");
            self.persist_index().await?;
        }
        Ok(())
    }

    /// Spawn the periodic flush loop. The returned handle aborts the loop
    /// on drop.
    pub fn spawn_flush_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.flush().await {
                    warn!(error = %err, "disk cache flush failed");
                }
            }
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ImageRequest;
    use url::Url;

    fn key(s: &str) -> DiskCacheKey {
        let req = ImageRequest::new(Url::parse(&format!("https://e.com/{s}")).unwrap());
        DiskCacheKey::for_request(&req, crate::keys::DataCachePolicy::StoredIds)
    }

    #[tokio::test]
    async fn staged_write_is_visible_before_flush() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::open(dir.path(), DiskCacheConfig::default()).await.unwrap();
        let k = key("a");
        cache.set(&k, Arc::new(vec![1, 2, 3]));
        assert_eq!(cache.get(&k).await.as_deref(), Some(&vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn flush_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::open(dir.path(), DiskCacheConfig::default()).await.unwrap();
        let k = key("a");
        cache.set(&k, Arc::new(vec![9, 9, 9]));
        cache.flush().await.unwrap();
        let filename = Sha1FilenameGenerator.filename(&k);
        assert!(dir.path().join(filename).exists());
    }

    #[tokio::test]
    async fn sweep_evicts_least_recently_accessed() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig { size_limit: 10, sweep_target_fraction: 0.9, ..DiskCacheConfig::default() };
        let cache = DataCache::open(dir.path(), config).await.unwrap();
        let a = key("a");
        let b = key("b");
        cache.set(&a, Arc::new(vec![0; 6]));
        cache.flush().await.unwrap();
        cache.set(&b, Arc::new(vec![0; 6]));
        cache.flush().await.unwrap();
        // "a" is older and below the sweep target, so it should be gone.
        assert!(cache.get(&a).await.is_none());
        assert!(cache.get(&b).await.is_some());
    }
}
