//! Centralized counter store.
//!
//! The limiter talks to a shared key-value store through the minimal
//! [`StoreClient`] command set. [`CentralizedStore`] layers the atomic
//! increment-and-expire contract on top of it.

mod centralized;
#[cfg(feature = "redis")]
mod redis_client;
#[cfg(test)]
pub(crate) mod testing;

pub use centralized::{CentralizedStore, ScriptMode, INCREMENT_AND_EXPIRE_SCRIPT};
#[cfg(feature = "redis")]
pub use redis_client::RedisClient;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StoreError;

/// Result type for store client calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// PTTL reply for a key that does not exist.
pub const PTTL_MISSING: i64 = -2;
/// PTTL reply for a key without an expiry.
pub const PTTL_NO_EXPIRY: i64 = -1;

/// Command set a centralized store client must provide.
///
/// Replies follow Redis semantics: `incr` returns the new value, `pttl`
/// returns `-2` for a missing key and `-1` for a key without expiry.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Whether `eval` is available. Checked once when a store is built.
    fn supports_scripting(&self) -> bool;

    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Attach an expiry in milliseconds. `false` if the key does not exist.
    async fn pexpire(&self, key: &str, ms: u64) -> StoreResult<bool>;

    async fn pttl(&self, key: &str) -> StoreResult<i64>;

    /// Run a server-side script and return its integer array reply.
    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> StoreResult<Vec<i64>>;

    async fn get(&self, key: &str) -> StoreResult<Option<i64>>;

    /// Delete a key, returning how many keys were removed.
    async fn del(&self, key: &str) -> StoreResult<u64>;
}

#[async_trait]
impl<T: StoreClient + ?Sized> StoreClient for Arc<T> {
    fn supports_scripting(&self) -> bool {
        (**self).supports_scripting()
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        (**self).incr(key).await
    }

    async fn pexpire(&self, key: &str, ms: u64) -> StoreResult<bool> {
        (**self).pexpire(key, ms).await
    }

    async fn pttl(&self, key: &str) -> StoreResult<i64> {
        (**self).pttl(key).await
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> StoreResult<Vec<i64>> {
        (**self).eval(script, keys, args).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        (**self).get(key).await
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        (**self).del(key).await
    }
}
