//! Cache collaborator contract.
//!
//! Callers construct a cache and hand it to whatever needs it as an
//! `Arc<dyn Cache>`; there is no process-wide instance. Keys are usually
//! derived from call parameters with [`cache_key`], so identical calls hit
//! the same entry regardless of field order.

use arborcore::Value;
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache key parameters are not serializable: {0}")]
    Key(#[from] serde_json::Error),

    #[error("cache backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value`; `ttl` of `None` keeps it until overwritten
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;
}

/// SHA-256 hex digest of the canonical JSON encoding of `params`
///
/// Object keys are sorted before hashing.
pub fn cache_key<T: Serialize + ?Sized>(params: &T) -> Result<String, CacheError> {
    // serde_json::Value objects are BTreeMap-backed, so re-encoding sorts keys
    let canonical = serde_json::to_string(&serde_json::to_value(params)?)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process cache; expired entries are dropped when next touched
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        let expired = entries.get(key)?.is_expired(Instant::now());
        if expired {
            debug!(key, "evicting expired cache entry");
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}
