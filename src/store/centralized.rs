//! Atomic increment-and-expire on top of a [`StoreClient`].

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::{StoreClient, StoreResult, PTTL_MISSING, PTTL_NO_EXPIRY};
use crate::error::{Result, StoreError};
use crate::ratelimit::{Backend, CounterBackend, CounterSnapshot};

/// Server-side script: increment, then attach the window expiry if the key was
/// just created or has lost its TTL. Returns `{count, ttl_ms}`.
pub const INCREMENT_AND_EXPIRE_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// How increments reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// One `EVAL` of [`INCREMENT_AND_EXPIRE_SCRIPT`]
    Atomic,
    /// `INCR`, `PEXPIRE`, `PTTL` as separate calls
    MultiCall,
}

/// Counter backend backed by a shared store.
pub struct CentralizedStore<C> {
    client: C,
    mode: ScriptMode,
}

impl<C: StoreClient> CentralizedStore<C> {
    /// Wrap a client, choosing the script mode from its capabilities.
    pub fn new(client: C) -> Self {
        let mode = if client.supports_scripting() {
            ScriptMode::Atomic
        } else {
            ScriptMode::MultiCall
        };
        debug!(?mode, "Centralized counter store ready");
        Self { client, mode }
    }

    pub fn mode(&self) -> ScriptMode {
        self.mode
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn increment_atomic(&self, key: &str, window_ms: u64) -> StoreResult<CounterSnapshot> {
        let reply = self
            .client
            .eval(INCREMENT_AND_EXPIRE_SCRIPT, &[key], &[window_ms.to_string()])
            .await?;

        match reply.as_slice() {
            [count, ttl] => Ok(CounterSnapshot {
                count: to_count(*count)?,
                ttl_ms: if *ttl < 0 { window_ms } else { *ttl as u64 },
            }),
            other => Err(StoreError::UnexpectedReply(format!(
                "expected [count, ttl], got {:?}",
                other
            ))),
        }
    }

    /// Increment without scripting support.
    ///
    /// A crash between `INCR` and `PEXPIRE` can leave the key without an
    /// expiry; the `PTTL` read-back repairs that on the next request.
    async fn increment_multi_call(&self, key: &str, window_ms: u64) -> StoreResult<CounterSnapshot> {
        let count = self.client.incr(key).await?;
        if count == 1 {
            self.client.pexpire(key, window_ms).await?;
        }

        let mut ttl = self.client.pttl(key).await?;
        if ttl < 0 {
            warn!(key, ttl, "Counter has no expiry, restoring window");
            self.client.pexpire(key, window_ms).await?;
            ttl = window_ms as i64;
        }

        Ok(CounterSnapshot {
            count: to_count(count)?,
            ttl_ms: ttl as u64,
        })
    }
}

fn to_count(value: i64) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::UnexpectedReply(format!("negative counter value {}", value)))
}

#[async_trait]
impl<C: StoreClient> CounterBackend for CentralizedStore<C> {
    fn kind(&self) -> Backend {
        Backend::Centralized
    }

    async fn increment_and_expire(&self, key: &str, window_ms: u64) -> Result<CounterSnapshot> {
        let snapshot = match self.mode {
            ScriptMode::Atomic => match self.increment_atomic(key, window_ms).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!(key, error = %e, "Atomic increment failed, using multi-call path");
                    self.increment_multi_call(key, window_ms).await?
                }
            },
            ScriptMode::MultiCall => self.increment_multi_call(key, window_ms).await?,
        };

        trace!(key, count = snapshot.count, ttl_ms = snapshot.ttl_ms, "Centralized increment");
        Ok(snapshot)
    }

    async fn snapshot(&self, key: &str, window_ms: u64) -> Result<Option<CounterSnapshot>> {
        let Some(count) = self.client.get(key).await? else {
            return Ok(None);
        };

        let ttl_ms = match self.client.pttl(key).await? {
            PTTL_MISSING => return Ok(None),
            PTTL_NO_EXPIRY => window_ms,
            ttl if ttl < 0 => window_ms,
            ttl => ttl as u64,
        };

        Ok(Some(CounterSnapshot {
            count: to_count(count)?,
            ttl_ms,
        }))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.client.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use crate::store::testing::FakeStoreClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn fake(scripting: bool) -> (Arc<ManualClock>, Arc<FakeStoreClient>) {
        let clock = Arc::new(ManualClock::new(0));
        let client = Arc::new(FakeStoreClient::new(clock.clone(), scripting));
        (clock, client)
    }

    #[test]
    fn test_mode_follows_capability() {
        let (_, client) = fake(true);
        assert_eq!(CentralizedStore::new(client).mode(), ScriptMode::Atomic);

        let (_, client) = fake(false);
        assert_eq!(CentralizedStore::new(client).mode(), ScriptMode::MultiCall);
    }

    #[tokio::test]
    async fn test_atomic_increment_sets_expiry_once() {
        let (clock, client) = fake(true);
        let store = CentralizedStore::new(client.clone());

        let first = store.increment_and_expire("k", 60_000).await.unwrap();
        assert_eq!(first, CounterSnapshot { count: 1, ttl_ms: 60_000 });

        clock.advance(Duration::from_millis(20_000));
        let second = store.increment_and_expire("k", 60_000).await.unwrap();
        assert_eq!(second, CounterSnapshot { count: 2, ttl_ms: 40_000 });

        assert_eq!(client.eval_calls(), 2);
        assert_eq!(client.incr_calls(), 0);
    }

    #[tokio::test]
    async fn test_script_failure_falls_back_to_multi_call() {
        let (_, client) = fake(true);
        client.fail_scripts(true);
        let store = CentralizedStore::new(client.clone());

        let first = store.increment_and_expire("k", 1_000).await.unwrap();
        let second = store.increment_and_expire("k", 1_000).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(second.ttl_ms, 1_000);
        assert_eq!(client.incr_calls(), 2);
        assert_eq!(client.ttl_of("k"), Some(1_000));
    }

    #[tokio::test]
    async fn test_multi_call_repairs_missing_expiry() {
        let (_, client) = fake(false);
        client.seed("k", 5, None);
        let store = CentralizedStore::new(client.clone());

        let snapshot = store.increment_and_expire("k", 30_000).await.unwrap();
        assert_eq!(snapshot, CounterSnapshot { count: 6, ttl_ms: 30_000 });
        assert_eq!(client.ttl_of("k"), Some(30_000));
    }

    #[tokio::test]
    async fn test_atomic_repairs_missing_expiry() {
        let (_, client) = fake(true);
        client.seed("k", 5, None);
        let store = CentralizedStore::new(client.clone());

        let snapshot = store.increment_and_expire("k", 30_000).await.unwrap();
        assert_eq!(snapshot.count, 6);
        assert_eq!(client.ttl_of("k"), Some(30_000));
    }

    #[tokio::test]
    async fn test_counter_expires_with_window() {
        let (clock, client) = fake(true);
        let store = CentralizedStore::new(client);

        store.increment_and_expire("k", 1_000).await.unwrap();
        store.increment_and_expire("k", 1_000).await.unwrap();
        clock.advance(Duration::from_millis(1_000));

        let snapshot = store.increment_and_expire("k", 1_000).await.unwrap();
        assert_eq!(snapshot.count, 1);
    }

    #[tokio::test]
    async fn test_snapshot_and_reset() {
        let (_, client) = fake(true);
        let store = CentralizedStore::new(client.clone());

        assert_eq!(store.snapshot("k", 1_000).await.unwrap(), None);
        store.increment_and_expire("k", 1_000).await.unwrap();
        assert_eq!(
            store.snapshot("k", 1_000).await.unwrap(),
            Some(CounterSnapshot { count: 1, ttl_ms: 1_000 })
        );

        client.seed("no-ttl", 3, None);
        assert_eq!(
            store.snapshot("no-ttl", 5_000).await.unwrap(),
            Some(CounterSnapshot { count: 3, ttl_ms: 5_000 })
        );

        store.reset("k").await.unwrap();
        assert_eq!(store.snapshot("k", 1_000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let (_, client) = fake(true);
        client.fail_all(true);
        let store = CentralizedStore::new(client);

        assert!(store.increment_and_expire("k", 1_000).await.is_err());
        assert!(store.snapshot("k", 1_000).await.is_err());
        assert!(store.reset("k").await.is_err());
    }
}
