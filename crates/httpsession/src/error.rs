//! Error types for session management.

/// Error type for session operations.
///
/// Absent state (no cookie, unknown session, missing key) is never an error;
/// those paths return `None`/`false` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session cookie was present but could not be decoded.
    #[error("Malformed session cookie: {0}")]
    Decode(String),

    /// A listener was registered that implements no listener capability.
    #[error("Unsupported listener: implements neither after-created nor before-release")]
    UnsupportedListener,

    /// A typed value could not be converted to or from its stored form.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The garbage collector was started outside a tokio runtime.
    #[error("No tokio runtime available to run the session garbage collector")]
    NoRuntime,

    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadConfig {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("failed to parse session config: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// Configuration parsed but is not usable.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
