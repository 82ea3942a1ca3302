//! Counter backend trait for abstracting the centralized and in-process stores.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Which store answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared, network-accessible store
    Centralized,
    /// Process-local fallback map
    Local,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Centralized => "centralized",
            Backend::Local => "local",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter value and remaining lifetime of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Requests counted in the current window
    pub count: u64,
    /// Milliseconds until the window expires
    pub ttl_ms: u64,
}

/// Trait for counter store implementations.
///
/// This trait abstracts over the centralized store and the in-process
/// `LocalStore` so the window engine can work with either.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> Backend;

    /// Increment the counter for `key`, attaching an expiry of `window_ms`
    /// when the increment created it.
    async fn increment_and_expire(&self, key: &str, window_ms: u64) -> Result<CounterSnapshot>;

    /// Read the counter without mutating it. `None` when no live window exists.
    async fn snapshot(&self, key: &str, window_ms: u64) -> Result<Option<CounterSnapshot>>;

    /// Delete the counter.
    async fn reset(&self, key: &str) -> Result<()>;
}
