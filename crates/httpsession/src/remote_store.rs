//! Session store backed by an external key/value cache.
//!
//! Each session is one JSON document in the cache. The cache is handed the
//! store's max-age as a TTL, so it does its own sweeping and
//! [`Store::gc`] stays a no-op. Backend failures never escape: reads degrade
//! to a miss and writes are logged and dropped, so an unreachable cache
//! looks like "no session" rather than failing every request.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::expiry::MaxAge;
use crate::id::SessionId;
use crate::store::Store;

/// Default prefix for cache keys.
pub const DEFAULT_KEY_PREFIX: &str = "httpsession:";

/// Error reported by a [`CacheBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The cache could not be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The cache answered with an error.
    #[error("Backend error: {0}")]
    Other(String),
}

/// Minimal byte-oriented cache client (memcached, redis, ...).
///
/// Implement this to plug an external cache into [`RemoteStore`].
pub trait CacheBackend: Send + Sync {
    /// Fetch the bytes stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store `value` under `key`, expiring after `ttl` if given.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), BackendError>;

    /// Delete `key`, returning whether it existed.
    fn delete(&self, key: &str) -> Result<bool, BackendError>;
}

/// Serialized form of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    values: HashMap<String, Value>,
    last_access: DateTime<Utc>,
}

impl StoredEntry {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            last_access: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_access = self.last_access.max(Utc::now());
    }

    fn is_expired(&self, max_age: Duration) -> bool {
        if max_age.is_zero() {
            return false;
        }
        let idle = (Utc::now() - self.last_access).to_std().unwrap_or_default();
        idle > max_age
    }
}

/// [`Store`] over an external [`CacheBackend`].
///
/// Every operation holds one process-wide lock across its backend calls, so
/// a clear can never be undone by a read-modify-write that loaded the entry
/// first. Writers in other processes are last-write-wins.
pub struct RemoteStore<B: CacheBackend> {
    backend: B,
    key_prefix: String,
    max_age: MaxAge,
    write_lock: Mutex<()>,
}

impl<B: CacheBackend> RemoteStore<B> {
    /// Create a store over `backend` with the given idle lifetime.
    pub fn new(backend: B, max_age: Duration) -> Self {
        Self {
            backend,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_age: MaxAge::new(max_age),
            write_lock: Mutex::new(()),
        }
    }

    /// Use a different cache key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Cache key used for `id`.
    pub fn cache_key(&self, id: &SessionId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn ttl(&self) -> Option<Duration> {
        let max_age = self.max_age.get();
        (!max_age.is_zero()).then_some(max_age)
    }

    fn load(&self, id: &SessionId) -> Option<StoredEntry> {
        let key = self.cache_key(id);
        let bytes = match self.backend.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session backend read failed, treating as miss");
                return None;
            }
        };

        let entry: StoredEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Stored session is unreadable, treating as miss");
                return None;
            }
        };

        if entry.is_expired(self.max_age.get()) {
            debug!(session_id = %id, "Session expired, removed on access");
            if let Err(e) = self.backend.delete(&key) {
                warn!(session_id = %id, error = %e, "Failed to delete expired session");
            }
            return None;
        }

        Some(entry)
    }

    fn save(&self, id: &SessionId, entry: &StoredEntry) -> bool {
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to encode session");
                return false;
            }
        };

        match self.backend.set(&self.cache_key(id), bytes, self.ttl()) {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session backend write failed");
                false
            }
        }
    }
}

impl<B: CacheBackend> Store for RemoteStore<B> {
    fn get(&self, id: &SessionId, key: &str) -> Option<Value> {
        let _guard = self.write_lock.lock();
        let mut entry = self.load(id)?;
        let value = entry.values.get(key).cloned();
        entry.touch();
        self.save(id, &entry);
        value
    }

    fn set(&self, id: &SessionId, key: &str, value: Value) {
        let _guard = self.write_lock.lock();
        let Some(mut entry) = self.load(id) else {
            trace!(session_id = %id, key = %key, "Ignoring set on unknown session");
            return;
        };
        entry.values.insert(key.to_string(), value);
        entry.touch();
        self.save(id, &entry);
    }

    fn del(&self, id: &SessionId, key: &str) -> bool {
        let _guard = self.write_lock.lock();
        let Some(mut entry) = self.load(id) else {
            return true;
        };
        entry.values.remove(key);
        entry.touch();
        self.save(id, &entry)
    }

    fn add(&self, id: &SessionId) {
        let _guard = self.write_lock.lock();
        let entry = match self.load(id) {
            Some(mut existing) => {
                existing.touch();
                existing
            }
            None => StoredEntry::new(),
        };
        self.save(id, &entry);
    }

    fn exist(&self, id: &SessionId) -> bool {
        let _guard = self.write_lock.lock();
        self.load(id).is_some()
    }

    fn clear(&self, id: &SessionId) -> bool {
        let _guard = self.write_lock.lock();
        match self.backend.delete(&self.cache_key(id)) {
            Ok(_) => {
                debug!(session_id = %id, "Session cleared");
                true
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session backend delete failed");
                false
            }
        }
    }

    fn set_max_age(&self, max_age: Duration) {
        self.max_age.set(max_age);
    }
}
