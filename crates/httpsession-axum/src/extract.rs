//! Handler-side access to the request's session.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use httpsession::Session;

use crate::rejection::SessionRejection;

/// The session resolved by [`session_middleware`](crate::session_middleware).
///
/// Dereferences to [`Session`] for reads and writes. Invalidation is
/// deferred: [`invalidate`](CurrentSession::invalidate) marks the session and
/// the middleware destroys it once the handler has produced its response.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    session: Session,
    invalidated: Arc<AtomicBool>,
}

impl CurrentSession {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            invalidated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying session handle.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Destroy the session when the response is sent.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    /// Whether [`invalidate`](CurrentSession::invalidate) has been called.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }
}

impl Deref for CurrentSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(SessionRejection::MissingMiddleware)
    }
}
