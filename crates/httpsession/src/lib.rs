//! HTTP session management.
//!
//! This crate provides the session layer of a web application:
//! - Signed, unpredictable session identifiers
//! - Cookie transfer with configurable attributes
//! - Pluggable stores (in-memory, external cache) with sliding expiry
//! - A bounded background garbage collector
//! - Lifecycle listeners for session creation and release
//!
//! # Example
//!
//! ```rust,ignore
//! use httpsession::{Manager, SessionConfig};
//!
//! let manager = Manager::from_config(&SessionConfig::load("app.toml")?)?;
//! let _gc = manager.run()?;
//!
//! // per request
//! let session = manager.session(&request_parts, response.headers_mut())?;
//! session.set("user_id", 42);
//! ```

mod config;
mod error;
mod expiry;
mod gc;
mod generator;
mod id;
mod listener;
mod manager;
mod memory_store;
mod remote_store;
mod session;
mod store;
mod transfer;

pub use config::{
    DEFAULT_COOKIE_NAME, DEFAULT_GC_INTERVAL, DEFAULT_GC_MAX_EXAMINED, DEFAULT_GC_MAX_REMOVED,
    DEFAULT_MAX_AGE, GcPolicy, SameSitePolicy, SessionConfig,
};
pub use error::{Error, Result};
pub use gc::{GcTask, spawn_gc};
pub use generator::{
    DEFAULT_KEY_LEN, IdGenerator, KeyedHashGenerator, SESSION_ID_LEN, generate_key,
};
pub use id::SessionId;
pub use listener::{AfterCreatedListener, BeforeReleaseListener, Listener};
pub use manager::Manager;
pub use memory_store::MemoryStore;
pub use remote_store::{BackendError, CacheBackend, DEFAULT_KEY_PREFIX, RemoteStore};
pub use session::Session;
pub use store::Store;
pub use transfer::{CookieSettings, CookieTransfer, Transfer};

pub use cookie::SameSite;
pub use serde_json::Value;
