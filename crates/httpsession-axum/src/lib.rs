//! axum integration for `httpsession`.
//!
//! Install [`session_middleware`] with `from_fn_with_state` and take a
//! [`CurrentSession`] in handlers:
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use httpsession::Manager;
//! use httpsession_axum::{CurrentSession, session_middleware};
//!
//! async fn visits(session: CurrentSession) -> String {
//!     let n = session.get_as::<u64>("visits").ok().flatten().unwrap_or(0) + 1;
//!     session.set("visits", n);
//!     n.to_string()
//! }
//!
//! let manager = Manager::with_defaults();
//! let _gc = manager.run()?;
//! let app = Router::new()
//!     .route("/", get(visits))
//!     .layer(middleware::from_fn_with_state(manager, session_middleware));
//! ```

mod extract;
mod middleware;
mod rejection;

pub use extract::CurrentSession;
pub use middleware::session_middleware;
pub use rejection::SessionRejection;
