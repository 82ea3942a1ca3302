//! In-process fixed-window counters.
//!
//! `LocalStore` is the fallback used when no centralized store is configured
//! or when the centralized store fails. Counts are only consistent within one
//! process.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::backend::{Backend, CounterBackend, CounterSnapshot};
use super::clock::Clock;
use crate::error::{LimiterError, Result};

/// A counter for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Requests seen in this window
    pub count: u64,
    /// When the window opened (epoch ms)
    pub window_start_ms: u64,
    /// When the last request was counted (epoch ms)
    pub last_request_ms: u64,
}

impl CounterRecord {
    fn start(now_ms: u64) -> Self {
        Self {
            count: 1,
            window_start_ms: now_ms,
            last_request_ms: now_ms,
        }
    }

    fn is_expired(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= window_ms
    }

    fn snapshot(&self, now_ms: u64, window_ms: u64) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count,
            ttl_ms: self
                .window_start_ms
                .saturating_add(window_ms)
                .saturating_sub(now_ms),
        }
    }
}

/// Process-wide counter map.
///
/// Each read-modify-write happens under the map's per-key entry lock, so
/// concurrent tasks on a multi-threaded runtime never lose an increment.
pub struct LocalStore {
    records: DashMap<String, CounterRecord>,
    clock: Arc<dyn Clock>,
    sweeper_running: AtomicBool,
}

impl LocalStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            sweeper_running: AtomicBool::new(false),
        }
    }

    /// Get a copy of the record for a key, expired or not.
    pub fn record(&self, key: &str) -> Option<CounterRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record whose window opened more than `max_age` ago.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = self.clock.now_ms();
        let max_age_ms = duration_ms(max_age);
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_sub(record.window_start_ms) <= max_age_ms);
        before.saturating_sub(self.records.len())
    }

    /// Start the periodic sweep task.
    ///
    /// Only one sweeper may run per store at a time; the task stops when the
    /// returned handle is shut down or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, max_age: Duration) -> Result<Sweeper> {
        if interval.is_zero() {
            return Err(LimiterError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.sweeper_running.swap(true, Ordering::SeqCst) {
            return Err(LimiterError::SweeperRunning);
        }

        // Released when the task future is dropped, however it ends.
        let slot = SweeperSlot(Arc::clone(self));
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        info!(
            interval_ms = duration_ms(interval),
            max_age_ms = duration_ms(max_age),
            "Starting local counter sweeper"
        );

        let handle = tokio::spawn(async move {
            let store = &slot.0;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep(max_age);
                        if removed > 0 {
                            debug!(removed, remaining = store.len(), "Swept idle local counters");
                        }
                    }
                }
            }

            info!("Local counter sweeper stopped");
        });

        Ok(Sweeper {
            stop: Some(stop_tx),
            handle,
        })
    }

    /// Count one request for `key` as of `now_ms`.
    pub fn increment_at(&self, key: &str, window_ms: u64, now_ms: u64) -> CounterSnapshot {
        match self.records.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now_ms, window_ms) {
                    trace!(key, "Local window elapsed, starting a new one");
                    *record = CounterRecord::start(now_ms);
                } else {
                    record.count += 1;
                    record.last_request_ms = now_ms;
                }
                record.snapshot(now_ms, window_ms)
            }
            Entry::Vacant(vacant) => {
                trace!(key, "Creating local counter");
                vacant
                    .insert(CounterRecord::start(now_ms))
                    .snapshot(now_ms, window_ms)
            }
        }
    }

    /// Read the live window for `key` as of `now_ms`.
    pub fn snapshot_at(&self, key: &str, window_ms: u64, now_ms: u64) -> Option<CounterSnapshot> {
        self.records
            .get(key)
            .filter(|record| !record.is_expired(now_ms, window_ms))
            .map(|record| record.snapshot(now_ms, window_ms))
    }
}

/// Marks a store as having a running sweeper for as long as it lives.
struct SweeperSlot(Arc<LocalStore>);

impl Drop for SweeperSlot {
    fn drop(&mut self) {
        self.0.sweeper_running.store(false, Ordering::SeqCst);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl CounterBackend for LocalStore {
    fn kind(&self) -> Backend {
        Backend::Local
    }

    async fn increment_and_expire(&self, key: &str, window_ms: u64) -> Result<CounterSnapshot> {
        Ok(self.increment_at(key, window_ms, self.clock.now_ms()))
    }

    async fn snapshot(&self, key: &str, window_ms: u64) -> Result<Option<CounterSnapshot>> {
        Ok(self.snapshot_at(key, window_ms, self.clock.now_ms()))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}

/// Handle to a running sweep task.
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Stop the sweep task and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            debug!(error = %e, "Sweeper task ended abnormally");
        }
    }
}
