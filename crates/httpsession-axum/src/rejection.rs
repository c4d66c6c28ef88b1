//! Rejections produced by the session middleware and extractor.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Why a request could not be given a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionRejection {
    /// The client sent a session cookie that cannot be decoded.
    #[error("Malformed session cookie: {0}")]
    MalformedCookie(String),

    /// A handler asked for the session but the middleware is not installed.
    #[error("Session middleware is not installed")]
    MissingMiddleware,

    /// Any other session failure.
    #[error("Session error: {0}")]
    Internal(String),
}

impl From<httpsession::Error> for SessionRejection {
    fn from(e: httpsession::Error) -> Self {
        match e {
            httpsession::Error::Decode(msg) => SessionRejection::MalformedCookie(msg),
            other => SessionRejection::Internal(other.to_string()),
        }
    }
}

impl SessionRejection {
    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            SessionRejection::MalformedCookie(_) => StatusCode::BAD_REQUEST,
            SessionRejection::MissingMiddleware | SessionRejection::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
