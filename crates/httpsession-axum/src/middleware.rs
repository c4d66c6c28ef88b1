//! Per-request session resolution.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use httpsession::Manager;
use tracing::warn;

use crate::extract::CurrentSession;
use crate::rejection::SessionRejection;

/// Resolve the session for each request and emit its cookies.
///
/// The resolved [`CurrentSession`] is placed in request extensions. Cookies
/// issued by the manager are appended to the handler's response, so
/// handler-set cookies survive. A malformed session cookie is rejected with
/// 400 and a clearing cookie, so the client's next request starts fresh.
pub async fn session_middleware(
    State(manager): State<Manager>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    // Feed the peer address to the identifier generator when available
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>().cloned() {
        parts.extensions.insert(addr);
    }

    let mut cookies = HeaderMap::new();
    let current = match manager.session(&parts, &mut cookies) {
        Ok(session) => CurrentSession::new(session),
        Err(e) => {
            let rejection = SessionRejection::from(e);
            warn!(error = %rejection, path = %parts.uri.path(), "Rejecting request session");

            let mut response = rejection.into_response();
            if response.status().is_client_error() {
                let mut clearing = HeaderMap::new();
                manager.clear_cookie(&mut clearing);
                append_set_cookies(&mut response, &clearing);
            }
            return response;
        }
    };
    parts.extensions.insert(current.clone());

    let mut response = next.run(Request::from_parts(parts, body)).await;

    if current.is_invalidated() {
        // A cookie issued for this request is superseded by the clearing one
        cookies.clear();
        manager.invalidate(&mut cookies, current.session());
    }
    append_set_cookies(&mut response, &cookies);

    response
}

fn append_set_cookies(response: &mut Response, cookies: &HeaderMap) {
    for value in cookies.get_all(SET_COOKIE) {
        response.headers_mut().append(SET_COOKIE, value.clone());
    }
}
