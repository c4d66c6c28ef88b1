//! Per-request session handle.

use std::fmt;

use http::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::id::SessionId;
use crate::manager::Manager;

/// A session identifier bound to the [`Manager`] that issued it.
///
/// The handle owns no state of its own: every call goes to the manager's
/// store under the bound identifier. Cloning is cheap.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    manager: Manager,
}

impl Session {
    pub(crate) fn new(id: SessionId, manager: Manager) -> Self {
        Self { id, manager }
    }

    /// The bound session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The manager this session belongs to.
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.manager.store().get(&self.id, key)
    }

    /// Store a raw value under `key`.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.manager.store().set(&self.id, key, value.into());
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub fn del(&self, key: &str) -> bool {
        self.manager.store().del(&self.id, key)
    }

    /// Value under `key` deserialized as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .get(key)
            .map(serde_json::from_value)
            .transpose()?)
    }

    /// Serialize `value` and store it under `key`.
    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Destroy this session: notify before-release listeners, drop the
    /// stored state and expire the client's cookie via `response`.
    pub fn invalidate(&self, response: &mut HeaderMap) {
        self.manager.invalidate(response, self);
    }

    /// Whether the bound identifier is structurally valid. Says nothing
    /// about whether the store still holds state for it.
    pub fn is_valid(&self) -> bool {
        self.manager.is_valid_id(&self.id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
