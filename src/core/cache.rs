//! Content cache for fetched locator bytes
//!
//! Entries are keyed by the SHA-256 of the *locator identity*, since content
//! is unknown until fetched. The identity is the locator string, except for
//! local paths, which are keyed on the resolved file (`file://<abs path>`) so
//! `local.txt` from two directories never shares an entry. Two layers:
//! - an in-memory LRU shared by every worker in the run
//! - an optional directory of `<key>.bin` files that survives across runs
//!
//! There is no invalidation; content per locator is assumed immutable within
//! a run. Concurrent fetches of the same key are serialized so only one of
//! them reaches the resolver, and the first disk write wins.

use crate::error::Result;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default number of entries kept in memory
pub const DEFAULT_MEMORY_ENTRIES: usize = 64;

/// Where a cached read was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Disk,
    /// Not cached; the fetch closure ran
    Fetched,
}

/// Shared content cache
pub struct ContentCache {
    dir: Option<PathBuf>,
    memory: Mutex<LruCache<String, Arc<Vec<u8>>>>,
    /// Per-key gates held while a fetch is in flight
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ContentCache {
    /// Memory-only cache
    pub fn in_memory(capacity: usize) -> Self {
        ContentCache {
            dir: None,
            memory: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN),
            )),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Cache persisted under `dir` (created if missing)
    pub fn on_disk(dir: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut cache = Self::in_memory(capacity);
        cache.dir = Some(dir);
        Ok(cache)
    }

    /// Cache key for a locator string
    pub fn key(locator: &str) -> String {
        hex::encode(Sha256::digest(locator.as_bytes()))
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{}.bin", key)))
    }

    fn lookup(&self, key: &str) -> Result<Option<(Vec<u8>, CacheSource)>> {
        if let Some(bytes) = self.memory.lock().get(key) {
            return Ok(Some((bytes.as_ref().clone(), CacheSource::Memory)));
        }
        if let Some(path) = self.path_for(key) {
            if path.exists() {
                let bytes = std::fs::read(&path)?;
                self.memory
                    .lock()
                    .put(key.to_string(), Arc::new(bytes.clone()));
                return Ok(Some((bytes, CacheSource::Disk)));
            }
        }
        Ok(None)
    }

    /// Cached bytes for `locator`, if any
    pub fn get(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(&Self::key(locator))?.map(|(bytes, _)| bytes))
    }

    /// Store bytes for `locator`
    ///
    /// Returns `false` when another writer already persisted this key; the
    /// existing entry is kept.
    pub fn put(&self, locator: &str, bytes: &[u8]) -> Result<bool> {
        self.store(&Self::key(locator), bytes)
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<bool> {
        let mut won = true;
        if let (Some(dir), Some(path)) = (self.dir.as_ref(), self.path_for(key)) {
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(bytes)?;
            match tmp.persist_noclobber(&path) {
                Ok(_) => {}
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Cache entry {} already written by another writer", key);
                    won = false;
                }
                Err(e) => return Err(e.error.into()),
            }
        }
        let mut memory = self.memory.lock();
        if won || !memory.contains(key) {
            memory.put(key.to_string(), Arc::new(bytes.to_vec()));
        }
        Ok(won)
    }

    /// Return cached bytes for `locator`, running `fetch` on a miss
    ///
    /// Callers racing on the same locator wait for the first fetch and then
    /// read its result instead of fetching again.
    pub fn get_or_fetch<F>(&self, locator: &str, fetch: F) -> Result<(Vec<u8>, CacheSource)>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let key = Self::key(locator);
        if let Some(found) = self.lookup(&key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }

        let gate = Arc::clone(
            self.inflight
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let _guard = gate.lock();

        if let Some(found) = self.lookup(&key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = fetch().and_then(|bytes| {
            self.store(&key, &bytes)?;
            Ok(bytes)
        });
        self.inflight.lock().remove(&key);
        Ok((result?, CacheSource::Fetched))
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Number of entries held in memory
    pub fn len(&self) -> usize {
        self.memory.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.lock().is_empty()
    }

    /// Drop the in-memory layer; disk entries are kept
    pub fn clear_memory(&self) {
        self.memory.lock().clear();
    }
}
