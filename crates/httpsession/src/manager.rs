//! Session manager: ties identifier generation, cookie transfer, storage and
//! listeners together for each request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use http::request::Parts;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{DEFAULT_COOKIE_NAME, DEFAULT_MAX_AGE, SessionConfig};
use crate::error::Result;
use crate::gc::{GcTask, spawn_gc};
use crate::generator::{DEFAULT_KEY_LEN, IdGenerator, KeyedHashGenerator, generate_key};
use crate::id::SessionId;
use crate::listener::{Listener, ListenerRegistry};
use crate::memory_store::MemoryStore;
use crate::session::Session;
use crate::store::Store;
use crate::transfer::{CookieSettings, CookieTransfer, Transfer};

/// Length of the random key used by [`Manager::with_defaults`].
const DEFAULT_RANDOM_KEY_LEN: usize = 16;

struct ManagerInner {
    store: Arc<dyn Store>,
    generator: Arc<dyn IdGenerator>,
    transfer: Arc<dyn Transfer>,
    listeners: ListenerRegistry,
    /// Serializes identifier resolution and issuance.
    issue_lock: Mutex<()>,
}

/// Process-wide session manager.
///
/// Construct once per server and share; cloning yields another handle to
/// the same manager.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Create a manager from its three collaborators.
    pub fn new<S, G, T>(store: S, generator: G, transfer: T) -> Self
    where
        S: Store + 'static,
        G: IdGenerator + 'static,
        T: Transfer + 'static,
    {
        Self::from_shared(Arc::new(store), Arc::new(generator), Arc::new(transfer))
    }

    /// Create a manager over collaborators that are shared elsewhere.
    pub fn from_shared(
        store: Arc<dyn Store>,
        generator: Arc<dyn IdGenerator>,
        transfer: Arc<dyn Transfer>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                generator,
                transfer,
                listeners: ListenerRegistry::default(),
                issue_lock: Mutex::new(()),
            }),
        }
    }

    /// In-memory sessions expiring after 30 idle minutes, a `SESSIONID`
    /// cookie and a random per-process signing key.
    pub fn with_defaults() -> Self {
        Self::new(
            MemoryStore::new(DEFAULT_MAX_AGE),
            KeyedHashGenerator::new(generate_key(DEFAULT_RANDOM_KEY_LEN)),
            CookieTransfer::new(
                CookieSettings::new(DEFAULT_COOKIE_NAME).with_max_age(DEFAULT_MAX_AGE),
            ),
        )
    }

    /// Build the in-memory stack described by `config`.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        config.validate()?;

        let key = match &config.hash_key {
            Some(key) => key.as_bytes().to_vec(),
            None => generate_key(DEFAULT_KEY_LEN),
        };
        let store = MemoryStore::new(config.max_age()).with_gc_policy(config.gc_policy());

        Ok(Self::new(
            store,
            KeyedHashGenerator::new(key),
            CookieTransfer::new(config.cookie_settings()),
        ))
    }

    /// The backing store.
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    /// Resolve the session for a request, issuing a new one if the request
    /// carries no valid identifier.
    ///
    /// A new identifier is written to `response` as a cookie. A cookie that
    /// is present but undecodable is returned as an error for the caller to
    /// handle. After-created listeners fire on every call.
    pub fn session(&self, request: &Parts, response: &mut HeaderMap) -> Result<Session> {
        let id = {
            let _guard = self.inner.issue_lock.lock();
            self.resolve_id(request, response)?
        };

        let session = Session::new(id, self.clone());
        self.inner.listeners.fire_after_created(&session);
        Ok(session)
    }

    fn resolve_id(&self, request: &Parts, response: &mut HeaderMap) -> Result<SessionId> {
        let inner = &self.inner;

        match inner.transfer.get(&request.headers)? {
            Some(id) if inner.generator.is_valid(&id) => {
                if !inner.store.exist(&id) {
                    // Expired, collected or lost on restart; keep the id
                    debug!(session_id = %id, "Reallocating state for known session id");
                    inner.store.add(&id);
                }
                Ok(id)
            }
            _ => {
                let id = inner.generator.generate(request);
                inner.transfer.set(&request.headers, response, &id);
                inner.store.add(&id);
                debug!(session_id = %id, "Issued new session");
                Ok(id)
            }
        }
    }

    /// Destroy `session`: fire before-release listeners, clear its stored
    /// state and expire the client's cookie.
    pub fn invalidate(&self, response: &mut HeaderMap, session: &Session) {
        self.inner.listeners.fire_before_release(session);
        self.inner.store.clear(session.id());
        self.inner.transfer.clear(response);
        info!(session_id = %session.id(), "Session invalidated");
    }

    /// Expire the client's session cookie without touching stored state.
    /// Used to reset clients that send an undecodable cookie.
    pub fn clear_cookie(&self, response: &mut HeaderMap) {
        self.inner.transfer.clear(response);
    }

    /// Change the session lifetime for both the store and new cookies.
    pub fn set_max_age(&self, max_age: Duration) {
        self.inner.store.set_max_age(max_age);
        self.inner.transfer.set_max_age(max_age);
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> Result<()> {
        self.inner.listeners.add(listener)
    }

    /// Unregister a lifecycle listener. Removing one that was never added
    /// is a no-op.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> Result<()> {
        self.inner.listeners.remove(listener)
    }

    /// Start the store's background garbage collector on the current tokio
    /// runtime. Returns `None` for stores that expire entries themselves.
    pub fn run(&self) -> Result<Option<GcTask>> {
        match self.inner.store.gc_interval() {
            Some(interval) => spawn_gc(Arc::clone(&self.inner.store), interval).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn is_valid_id(&self, id: &SessionId) -> bool {
        self.inner.generator.is_valid(id)
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (after_created, before_release) = self.inner.listeners.counts();
        f.debug_struct("Manager")
            .field("after_created_listeners", &after_created)
            .field("before_release_listeners", &before_release)
            .finish_non_exhaustive()
    }
}
