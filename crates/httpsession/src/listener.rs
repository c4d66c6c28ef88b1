//! Session lifecycle listeners.
//!
//! A listener advertises which callbacks it supports through capability
//! queries; registering one that supports none is an error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::session::Session;

/// Notified every time the manager hands out a session.
pub trait AfterCreatedListener: Send + Sync {
    fn on_after_created(&self, session: &Session);
}

/// Notified before a session is invalidated.
pub trait BeforeReleaseListener: Send + Sync {
    fn on_before_release(&self, session: &Session);
}

/// A registrable listener.
///
/// ```ignore
/// struct Audit;
///
/// impl AfterCreatedListener for Audit {
///     fn on_after_created(&self, session: &Session) { /* ... */ }
/// }
///
/// impl Listener for Audit {
///     fn as_after_created(&self) -> Option<&dyn AfterCreatedListener> {
///         Some(self)
///     }
/// }
/// ```
pub trait Listener: Send + Sync {
    /// The after-created capability, if supported.
    fn as_after_created(&self) -> Option<&dyn AfterCreatedListener> {
        None
    }

    /// The before-release capability, if supported.
    fn as_before_release(&self) -> Option<&dyn BeforeReleaseListener> {
        None
    }
}

type ListenerMap = RwLock<HashMap<usize, Arc<dyn Listener>>>;

/// Identity of a listener: the address of its shared allocation.
fn listener_key(listener: &Arc<dyn Listener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Per-manager listener sets. Callbacks run on a snapshot taken without
/// holding the registry lock, so they may register or remove listeners.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    after_created: ListenerMap,
    before_release: ListenerMap,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<dyn Listener>) -> Result<()> {
        let after_created = listener.as_after_created().is_some();
        let before_release = listener.as_before_release().is_some();
        if !after_created && !before_release {
            return Err(Error::UnsupportedListener);
        }

        let key = listener_key(&listener);
        if after_created {
            self.after_created.write().insert(key, Arc::clone(&listener));
        }
        if before_release {
            self.before_release.write().insert(key, listener);
        }
        Ok(())
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn Listener>) -> Result<()> {
        let after_created = listener.as_after_created().is_some();
        let before_release = listener.as_before_release().is_some();
        if !after_created && !before_release {
            return Err(Error::UnsupportedListener);
        }

        let key = listener_key(listener);
        if after_created {
            self.after_created.write().remove(&key);
        }
        if before_release {
            self.before_release.write().remove(&key);
        }
        Ok(())
    }

    pub(crate) fn fire_after_created(&self, session: &Session) {
        for listener in snapshot(&self.after_created) {
            if let Some(callback) = listener.as_after_created() {
                callback.on_after_created(session);
            }
        }
    }

    pub(crate) fn fire_before_release(&self, session: &Session) {
        for listener in snapshot(&self.before_release) {
            if let Some(callback) = listener.as_before_release() {
                callback.on_before_release(session);
            }
        }
    }

    pub(crate) fn counts(&self) -> (usize, usize) {
        (
            self.after_created.read().len(),
            self.before_release.read().len(),
        )
    }
}

fn snapshot(map: &ListenerMap) -> Vec<Arc<dyn Listener>> {
    map.read().values().cloned().collect()
}
