//! Moving session identifiers to and from the wire.

use std::time::Duration;

use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::{Cookie, SameSite};
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::config::{DEFAULT_COOKIE_NAME, DEFAULT_MAX_AGE};
use crate::error::{Error, Result};
use crate::id::SessionId;

/// Reads and writes the session identifier carried by a request/response.
pub trait Transfer: Send + Sync {
    /// Extract the identifier from request headers.
    ///
    /// Returns `Ok(None)` when the client sent no identifier and
    /// [`Error::Decode`] when it sent one that cannot be decoded.
    fn get(&self, request: &HeaderMap) -> Result<Option<SessionId>>;

    /// Attach `id` to the response so the client sends it back.
    fn set(&self, request: &HeaderMap, response: &mut HeaderMap, id: &SessionId);

    /// Tell the client to drop its identifier.
    fn clear(&self, response: &mut HeaderMap);

    /// Change the lifetime of identifiers issued from now on.
    fn set_max_age(&self, max_age: Duration);
}

/// Attributes applied to every session cookie.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Cookie name.
    pub name: String,
    /// Cookie path.
    pub path: String,
    /// Optional cookie domain.
    pub domain: Option<String>,
    /// Send only over HTTPS.
    pub secure: bool,
    /// Hide from client-side scripts.
    pub http_only: bool,
    /// Optional SameSite policy.
    pub same_site: Option<SameSite>,
    /// Cookie lifetime. Zero issues a browser-session cookie.
    pub max_age: Duration,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_NAME)
    }
}

impl CookieSettings {
    /// Settings for a cookie named `name` with default attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: None,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Set the cookie path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the cookie domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the `Secure` flag.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `HttpOnly` flag.
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set the SameSite policy.
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Set the cookie lifetime.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn builder<'c>(&self, value: String) -> cookie::CookieBuilder<'c> {
        let mut builder = Cookie::build((self.name.clone(), value))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(same_site) = self.same_site {
            builder = builder.same_site(same_site);
        }
        builder
    }
}

/// Carries the session identifier in a cookie.
///
/// The settings act as a shared template; `set` and `set_max_age` serialize
/// on its lock so a lifetime change never tears a cookie being issued.
#[derive(Debug)]
pub struct CookieTransfer {
    settings: Mutex<CookieSettings>,
}

impl CookieTransfer {
    /// Create a transfer with the given cookie attributes.
    pub fn new(settings: CookieSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    /// Name of the session cookie.
    pub fn cookie_name(&self) -> String {
        self.settings.lock().name.clone()
    }

    /// Snapshot of the current cookie attributes.
    pub fn settings(&self) -> CookieSettings {
        self.settings.lock().clone()
    }
}

impl Default for CookieTransfer {
    fn default() -> Self {
        Self::new(CookieSettings::default())
    }
}

impl Transfer for CookieTransfer {
    fn get(&self, request: &HeaderMap) -> Result<Option<SessionId>> {
        let name = self.cookie_name();

        for header in request.get_all(COOKIE) {
            let raw = std::str::from_utf8(header.as_bytes())
                .map_err(|e| Error::Decode(format!("cookie header is not UTF-8: {e}")))?;

            for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let pair_name = pair.split_once('=').map_or(pair, |(n, _)| n).trim();
                if pair_name != name {
                    continue;
                }

                let cookie = Cookie::parse_encoded(pair)
                    .map_err(|e| Error::Decode(format!("cookie '{name}': {e}")))?;
                if cookie.value().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(SessionId::new(cookie.value())));
            }
        }

        Ok(None)
    }

    fn set(&self, _request: &HeaderMap, response: &mut HeaderMap, id: &SessionId) {
        let cookie = {
            let settings = self.settings.lock();
            let mut builder = settings.builder(id.as_str().to_string());
            if !settings.max_age.is_zero() {
                let secs = i64::try_from(settings.max_age.as_secs()).unwrap_or(i64::MAX);
                let lifetime = CookieDuration::seconds(secs);
                builder = builder.max_age(lifetime);
                if let Some(expires) = OffsetDateTime::now_utc().checked_add(lifetime) {
                    builder = builder.expires(expires);
                }
            }
            builder.build()
        };

        trace!(session_id = %id, "Issuing session cookie");
        append_cookie(response, &cookie);
    }

    fn clear(&self, response: &mut HeaderMap) {
        let mut cookie = self.settings.lock().builder(String::new()).build();
        cookie.make_removal();
        append_cookie(response, &cookie);
    }

    fn set_max_age(&self, max_age: Duration) {
        self.settings.lock().max_age = max_age;
    }
}

fn append_cookie(response: &mut HeaderMap, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.encoded().to_string()) {
        Ok(value) => {
            response.append(SET_COOKIE, value);
        }
        Err(e) => {
            warn!(cookie = %cookie.name(), error = %e, "Session cookie is not a valid header value");
        }
    }
}
