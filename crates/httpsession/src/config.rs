//! Configuration for the session manager.
//!
//! ```toml
//! [session]
//! cookie_name = "SESSIONID"
//! max_age_secs = 1800
//! gc_interval_secs = 10
//! secure = true
//! same_site = "lax"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transfer::CookieSettings;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "SESSIONID";

/// Default idle time after which a session expires (30 minutes).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Default interval between garbage-collection sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

/// Default number of entries a single sweep may look at.
pub const DEFAULT_GC_MAX_EXAMINED: usize = 20;

/// Default number of entries a single sweep may remove.
pub const DEFAULT_GC_MAX_REMOVED: usize = 5;

/// Bounds on the background garbage collector.
///
/// A sweep stops after examining `max_examined` entries or removing
/// `max_removed`, whichever comes first; leftovers are caught on a later
/// tick or lazily on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcPolicy {
    /// Time between sweeps.
    pub interval: Duration,
    /// Entries examined per sweep.
    pub max_examined: usize,
    /// Entries removed per sweep.
    pub max_removed: usize,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_GC_INTERVAL,
            max_examined: DEFAULT_GC_MAX_EXAMINED,
            max_removed: DEFAULT_GC_MAX_REMOVED,
        }
    }
}

/// SameSite attribute as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl From<SameSitePolicy> for cookie::SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => cookie::SameSite::Strict,
            SameSitePolicy::Lax => cookie::SameSite::Lax,
            SameSitePolicy::None => cookie::SameSite::None,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session identifier.
    pub cookie_name: String,

    /// Idle seconds before a session expires; also the cookie lifetime.
    /// Zero is only accepted together with `never_expire`.
    pub max_age_secs: u64,

    /// Opt in to sessions that never expire (`max_age_secs = 0`).
    pub never_expire: bool,

    /// Seconds between garbage-collection sweeps.
    pub gc_interval_secs: u64,

    /// Entries examined per sweep.
    pub gc_max_examined: usize,

    /// Entries removed per sweep.
    pub gc_max_removed: usize,

    /// Cookie path.
    pub cookie_path: String,

    /// Cookie domain.
    pub cookie_domain: Option<String>,

    /// Mark the cookie `Secure`.
    pub secure: bool,

    /// Mark the cookie `HttpOnly`.
    pub http_only: bool,

    /// Cookie SameSite policy.
    pub same_site: Option<SameSitePolicy>,

    /// Secret used to sign session identifiers. A random key is generated
    /// when unset, which invalidates all sessions on restart.
    pub hash_key: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            max_age_secs: DEFAULT_MAX_AGE.as_secs(),
            never_expire: false,
            gc_interval_secs: DEFAULT_GC_INTERVAL.as_secs(),
            gc_max_examined: DEFAULT_GC_MAX_EXAMINED,
            gc_max_removed: DEFAULT_GC_MAX_REMOVED,
            cookie_path: "/".to_string(),
            cookie_domain: None,
            secure: false,
            http_only: true,
            same_site: None,
            hash_key: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    #[serde(default)]
    session: SessionConfig,
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document whose top-level keys are session options.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Parse the `[session]` table of a larger TOML document. A missing
    /// table yields the defaults.
    pub fn from_toml_section(toml_str: &str) -> Result<Self> {
        let section: SessionSection = toml::from_str(toml_str)?;
        Ok(section.session)
    }

    /// Load the `[session]` table from a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_section(&contents)
    }

    /// Reject configurations that would silently misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.cookie_name.trim().is_empty() {
            return Err(Error::InvalidConfig("cookie_name must not be empty".into()));
        }
        if self.max_age_secs == 0 && !self.never_expire {
            return Err(Error::InvalidConfig(
                "max_age_secs = 0 disables expiry; set never_expire = true to allow it".into(),
            ));
        }
        if self.gc_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "gc_interval_secs must be greater than zero".into(),
            ));
        }
        if self.gc_max_examined == 0 || self.gc_max_removed == 0 {
            return Err(Error::InvalidConfig(
                "gc_max_examined and gc_max_removed must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Session idle lifetime. Zero when `never_expire` is set.
    pub fn max_age(&self) -> Duration {
        if self.never_expire {
            Duration::ZERO
        } else {
            Duration::from_secs(self.max_age_secs)
        }
    }

    /// Garbage-collector bounds.
    pub fn gc_policy(&self) -> GcPolicy {
        GcPolicy {
            interval: Duration::from_secs(self.gc_interval_secs),
            max_examined: self.gc_max_examined,
            max_removed: self.gc_max_removed,
        }
    }

    /// Cookie attributes derived from this configuration.
    pub fn cookie_settings(&self) -> CookieSettings {
        let mut settings = CookieSettings::new(self.cookie_name.clone())
            .with_path(self.cookie_path.clone())
            .with_secure(self.secure)
            .with_http_only(self.http_only)
            .with_max_age(self.max_age());
        if let Some(domain) = &self.cookie_domain {
            settings = settings.with_domain(domain.clone());
        }
        if let Some(same_site) = self.same_site {
            settings = settings.with_same_site(same_site.into());
        }
        settings
    }

    /// Set the cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the idle lifetime.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_secs = max_age.as_secs();
        self.never_expire = false;
        self
    }

    /// Sessions never expire.
    pub fn without_expiry(mut self) -> Self {
        self.max_age_secs = 0;
        self.never_expire = true;
        self
    }

    /// Set the sweep interval.
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval_secs = interval.as_secs();
        self
    }

    /// Set the `Secure` cookie flag.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the identifier signing key.
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = Some(key.into());
        self
    }
}
