//! In-memory stand-in for a Redis server.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{StoreClient, StoreResult, INCREMENT_AND_EXPIRE_SCRIPT, PTTL_MISSING, PTTL_NO_EXPIRY};
use crate::error::StoreError;
use crate::ratelimit::{Clock, ManualClock};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at_ms: Option<u64>,
}

/// Emulates the Redis commands used by the limiter against a [`ManualClock`].
pub(crate) struct FakeStoreClient {
    clock: Arc<ManualClock>,
    scripting: bool,
    entries: Mutex<HashMap<String, Entry>>,
    fail_all: AtomicBool,
    fail_scripts: AtomicBool,
    eval_calls: AtomicUsize,
    incr_calls: AtomicUsize,
}

impl FakeStoreClient {
    pub(crate) fn new(clock: Arc<ManualClock>, scripting: bool) -> Self {
        Self {
            clock,
            scripting,
            entries: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
            fail_scripts: AtomicBool::new(false),
            eval_calls: AtomicUsize::new(0),
            incr_calls: AtomicUsize::new(0),
        }
    }

    /// Make every command fail as if the server were unreachable.
    pub(crate) fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make only `eval` fail.
    pub(crate) fn fail_scripts(&self, fail: bool) {
        self.fail_scripts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn eval_calls(&self) -> usize {
        self.eval_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn incr_calls(&self) -> usize {
        self.incr_calls.load(Ordering::SeqCst)
    }

    /// Insert a raw key, optionally with a TTL.
    pub(crate) fn seed(&self, key: &str, value: i64, ttl_ms: Option<u64>) {
        let expires_at_ms = ttl_ms.map(|ttl| self.clock.now_ms() + ttl);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms,
            },
        );
    }

    /// Remaining TTL of a live key, `None` if it is missing or has no expiry.
    pub(crate) fn ttl_of(&self, key: &str) -> Option<u64> {
        match self.pttl_now(&mut self.entries.lock(), key) {
            ttl if ttl >= 0 => Some(ttl as u64),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        self.purge(&mut entries, key);
        entries.contains_key(key)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    fn purge(&self, entries: &mut HashMap<String, Entry>, key: &str) {
        let now = self.clock.now_ms();
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at_ms)
            .is_some_and(|at| at <= now);
        if expired {
            entries.remove(key);
        }
    }

    fn incr_now(&self, entries: &mut HashMap<String, Entry>, key: &str) -> i64 {
        self.purge(entries, key);
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at_ms: None,
        });
        entry.value += 1;
        entry.value
    }

    fn pexpire_now(&self, entries: &mut HashMap<String, Entry>, key: &str, ms: u64) -> bool {
        self.purge(entries, key);
        let now = self.clock.now_ms();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = Some(now + ms);
                true
            }
            None => false,
        }
    }

    fn pttl_now(&self, entries: &mut HashMap<String, Entry>, key: &str) -> i64 {
        self.purge(entries, key);
        let now = self.clock.now_ms();
        match entries.get(key) {
            None => PTTL_MISSING,
            Some(Entry {
                expires_at_ms: None,
                ..
            }) => PTTL_NO_EXPIRY,
            Some(Entry {
                expires_at_ms: Some(at),
                ..
            }) => (*at - now) as i64,
        }
    }
}

#[async_trait]
impl StoreClient for FakeStoreClient {
    fn supports_scripting(&self) -> bool {
        self.scripting
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.check_available()?;
        self.incr_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.incr_now(&mut self.entries.lock(), key))
    }

    async fn pexpire(&self, key: &str, ms: u64) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.pexpire_now(&mut self.entries.lock(), key, ms))
    }

    async fn pttl(&self, key: &str) -> StoreResult<i64> {
        self.check_available()?;
        Ok(self.pttl_now(&mut self.entries.lock(), key))
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[String]) -> StoreResult<Vec<i64>> {
        self.check_available()?;
        self.eval_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_scripts.load(Ordering::SeqCst) {
            return Err(StoreError::Script("NOSCRIPT scripting disabled".to_string()));
        }
        if script != INCREMENT_AND_EXPIRE_SCRIPT {
            return Err(StoreError::Script("unknown script".to_string()));
        }

        let (Some(key), Some(window_ms)) = (keys.first(), args.first()) else {
            return Err(StoreError::Script("wrong number of arguments".to_string()));
        };
        let window_ms: u64 = window_ms
            .parse()
            .map_err(|_| StoreError::Script(format!("invalid window {}", window_ms)))?;

        // The whole script runs under one lock, like a script on a real server.
        let mut entries = self.entries.lock();
        let count = self.incr_now(&mut entries, key);
        let mut ttl = self.pttl_now(&mut entries, key);
        if count == 1 || ttl < 0 {
            self.pexpire_now(&mut entries, key, window_ms);
            ttl = window_ms as i64;
        }
        Ok(vec![count, ttl])
    }

    async fn get(&self, key: &str) -> StoreResult<Option<i64>> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        self.purge(&mut entries, key);
        Ok(entries.get(key).map(|e| e.value))
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        self.purge(&mut entries, key);
        Ok(entries.remove(key).map_or(0, |_| 1))
    }
}
