//! Error types for the activity limiter.

use thiserror::Error;

/// Main error type for limiter operations.
///
/// A request being over its quota is not an error; it is reported through
/// [`crate::ratelimit::RateLimitResult`] with `success == false`.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The actor identity could not be resolved
    #[error("Identity resolution failed: {0}")]
    Identity(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// A sweeper task is already running for this store
    #[error("A sweeper is already running for this store")]
    SweeperRunning,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a centralized store client.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// A plain command was rejected
    #[error("command {command} failed: {reason}")]
    Command { command: &'static str, reason: String },

    /// Server-side script evaluation failed
    #[error("script evaluation failed: {0}")]
    Script(String),

    /// The store answered with something we cannot interpret
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Redis client errors
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
