//! The session storage contract.

use std::time::Duration;

use serde_json::Value;

use crate::id::SessionId;

/// Backend holding per-session key/value state.
///
/// Every operation is safe to call concurrently from request handlers and
/// the garbage collector. Absence is never an error: reads of unknown
/// sessions or keys return `None`, deletes are idempotent.
///
/// An entry exists only between [`add`](Store::add) and its removal by
/// [`clear`](Store::clear), expiry or garbage collection. Reads and writes
/// refresh the entry's last-access time (sliding expiry).
pub trait Store: Send + Sync {
    /// Value stored under `key`, or `None` when the session or key is absent
    /// or the session has expired.
    fn get(&self, id: &SessionId, key: &str) -> Option<Value>;

    /// Store `value` under `key`. A no-op for unknown or expired sessions.
    fn set(&self, id: &SessionId, key: &str, value: Value);

    /// Remove `key`. Returns `true` unless the backend failed.
    fn del(&self, id: &SessionId, key: &str) -> bool;

    /// Allocate an empty entry for `id`.
    fn add(&self, id: &SessionId);

    /// Whether a live entry exists for `id`.
    fn exist(&self, id: &SessionId) -> bool;

    /// Destroy the entry for `id`. Returns `true` unless the backend failed.
    fn clear(&self, id: &SessionId) -> bool;

    /// Change the idle time after which entries expire. Zero disables expiry.
    fn set_max_age(&self, max_age: Duration);

    /// Run one bounded garbage-collection sweep, returning the number of
    /// entries removed. Backends that expire entries themselves keep the
    /// default.
    fn gc(&self) -> usize {
        0
    }

    /// How often [`gc`](Store::gc) should run, or `None` if this backend
    /// needs no background sweeping.
    fn gc_interval(&self) -> Option<Duration> {
        None
    }

    /// Number of entries held, or `None` if the backend cannot count them.
    fn len(&self) -> Option<usize> {
        None
    }

    /// Whether the store holds no entries, when that is known.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|n| n == 0)
    }
}
