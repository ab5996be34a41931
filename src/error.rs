//! Error types for the confab engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the confab engine
///
/// The taxonomy mirrors how failures propagate: `Config` fails a `connect()`
/// synchronously before any resource is acquired, `Acquisition`, `Channel`
/// and `Decode` are fatal to the session, and `Protocol` is isolated to the
/// single inbound message that caused it.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, invalid endpoint)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device acquisition failure (microphone or speaker unavailable)
    #[error("audio device error: {0}")]
    Acquisition(String),

    /// Transport-level channel failure
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed inbound message; dropped without killing the session
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Audio decode fault (wire payload that is not valid PCM)
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
