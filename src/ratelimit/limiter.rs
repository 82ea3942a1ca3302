//! The rate limiter facade.
//!
//! [`RateLimiter`] is the only type callers need: it turns an action and an
//! actor into a counter key, runs the fixed-window check against the
//! centralized store (falling back to the in-process store when that fails),
//! records a metric and reports the decision.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::action::{ActionConfig, ActionTable, ActionType, Role, RoleMultipliers};
use super::backend::{Backend, CounterBackend, CounterSnapshot};
use super::clock::{Clock, SystemClock};
use super::counter::{LocalStore, Sweeper};
use super::headers::{GuardError, RateLimitHeaders, Rejection};
use super::key::{Actor, Identifier, IdentityResolver, NoSession, RateLimitKey, DEFAULT_NAMESPACE};
use super::metrics::{MetricEvent, MetricsSink, TracingMetrics};
use super::window::{self, WindowOutcome};
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::store::{CentralizedStore, StoreClient};

/// Default multiple of the longest window after which idle local counters are swept.
const DEFAULT_EVICTION_FACTOR: u32 = 2;

/// Decision for one rate-limited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub success: bool,
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Effective quota for the window
    pub limit: u64,
    pub remaining_requests: u64,
    pub reset_time: DateTime<Utc>,
    /// Denial reason, present only when `success` is false
    pub message: Option<String>,
    pub backend: Backend,
}

/// Read-only view of an actor's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
    /// True when the next request would be denied
    pub blocked: bool,
    pub backend: Backend,
}

/// Per-action rate limiter with a centralized store and an in-process fallback.
pub struct RateLimiter {
    actions: ActionTable,
    roles: RoleMultipliers,
    namespace: String,
    eviction_factor: u32,
    centralized: Option<Arc<dyn CounterBackend>>,
    local: Arc<LocalStore>,
    resolver: Arc<dyn IdentityResolver>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    /// Set after the first centralized-store failure has been logged
    degraded_warned: AtomicBool,
}

impl RateLimiter {
    /// Create a limiter that only uses the in-process store.
    pub fn new(actions: ActionTable) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            actions,
            roles: RoleMultipliers::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            eviction_factor: DEFAULT_EVICTION_FACTOR,
            centralized: None,
            local: Arc::new(LocalStore::new(clock.clone())),
            resolver: Arc::new(NoSession),
            metrics: Arc::new(TracingMetrics),
            clock,
            degraded_warned: AtomicBool::new(false),
        }
    }

    /// Create a limiter from loaded configuration.
    ///
    /// The centralized store is attached separately since connecting to it is
    /// asynchronous.
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(ActionTable::with_overrides(&config.actions))
            .with_roles(config.roles)
            .with_namespace(&config.store.namespace)
            .with_eviction_factor(config.sweep.eviction_factor)
    }

    /// Use a centralized counter backend, tried first on every call.
    pub fn with_centralized(mut self, backend: Arc<dyn CounterBackend>) -> Self {
        self.centralized = Some(backend);
        self
    }

    /// Use a centralized store reached through `client`.
    pub fn with_store_client<C: StoreClient + 'static>(self, client: C) -> Self {
        self.with_centralized(Arc::new(CentralizedStore::new(client)))
    }

    /// Replace the clock. Resets the in-process store, so call this before use.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.local = Arc::new(LocalStore::new(clock.clone()));
        self.clock = clock;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_roles(mut self, roles: RoleMultipliers) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_eviction_factor(mut self, factor: u32) -> Self {
        self.eviction_factor = factor.max(1);
        self
    }

    /// The action table in use.
    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    /// The in-process fallback store.
    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn has_centralized(&self) -> bool {
        self.centralized.is_some()
    }

    /// Count one request for `actor` and decide whether it may proceed.
    ///
    /// Over-quota requests are reported with `success == false`; only identity
    /// resolution failures are returned as errors.
    pub async fn check(&self, action: ActionType, actor: &Actor) -> Result<RateLimitResult> {
        let key = self.key_for(action, actor).await?;
        let config = self.effective_config(action, actor.role);
        let store_key = key.to_store_key();

        trace!(key = %key, limit = config.max_requests, "Checking rate limit");

        let now = self.clock.now_ms();
        let (snapshot, backend) = self.increment(&store_key, config.window_ms, now).await?;
        let outcome = window::evaluate(snapshot, config.max_requests, now);

        if !outcome.success {
            debug!(
                key = %key,
                count = outcome.count,
                limit = config.max_requests,
                backend = %backend,
                "Rate limit exceeded"
            );
        }

        self.metrics.record(MetricEvent::check(
            action,
            backend,
            outcome.success,
            outcome.remaining,
            config.max_requests,
            to_datetime(now),
        ));

        Ok(build_result(outcome, &config, backend))
    }

    /// Report the actor's quota without counting a request.
    pub async fn status(&self, action: ActionType, actor: &Actor) -> Result<RateLimitStatus> {
        let (outcome, config, backend) = self.inspect(action, actor).await?;
        Ok(RateLimitStatus {
            limit: config.max_requests,
            remaining: outcome.remaining,
            reset_time: to_datetime(outcome.reset_at_ms),
            blocked: outcome.remaining == 0,
            backend,
        })
    }

    /// Whether the next request would be allowed.
    pub async fn precheck(&self, action: ActionType, actor: &Actor) -> Result<bool> {
        Ok(!self.status(action, actor).await?.blocked)
    }

    /// Decide whether `batch_size` requests fit in the remaining quota.
    ///
    /// Nothing is counted regardless of the outcome.
    pub async fn batch_check(
        &self,
        action: ActionType,
        actor: &Actor,
        batch_size: u64,
    ) -> Result<RateLimitResult> {
        let (outcome, config, backend) = self.inspect(action, actor).await?;
        let outcome = WindowOutcome {
            success: outcome.remaining >= batch_size,
            ..outcome
        };

        if !outcome.success {
            debug!(
                action = %action,
                batch_size,
                remaining = outcome.remaining,
                "Batch exceeds remaining quota"
            );
        }

        Ok(build_result(outcome, &config, backend))
    }

    /// Clear a user's counters for one action, or for every action.
    pub async fn reset(&self, user_id: &str, action: Option<ActionType>) {
        let actions = match action {
            Some(action) => vec![action],
            None => ActionType::ALL.to_vec(),
        };

        let keys: Vec<String> = actions
            .into_iter()
            .map(|action| {
                RateLimitKey::new(&self.namespace, action, Identifier::User(user_id.to_string()))
                    .to_store_key()
            })
            .collect();

        join_all(keys.iter().map(|key| self.reset_key(key))).await;

        info!(user_id, action = ?action, "Rate limit counters reset");
    }

    /// A copy of `base` with its quota scaled for `role`.
    pub fn role_multiplier(&self, base: &ActionConfig, role: Role) -> ActionConfig {
        self.roles.apply(base, role)
    }

    /// Start sweeping idle in-process counters every `interval`.
    ///
    /// Counters whose window opened more than `eviction_factor` longest
    /// windows ago are dropped.
    pub fn start_sweeper(&self, interval: Duration) -> Result<Sweeper> {
        let max_age = self
            .actions
            .longest_window()
            .checked_mul(self.eviction_factor)
            .unwrap_or(Duration::MAX);
        self.local.spawn_sweeper(interval, max_age)
    }

    /// Run `handler` only if the actor is within quota.
    ///
    /// A denial becomes [`GuardError::Limited`] carrying the 429 message and
    /// response headers.
    pub async fn guard<F, Fut, T>(
        &self,
        action: ActionType,
        actor: &Actor,
        handler: F,
    ) -> std::result::Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let result = self.check(action, actor).await?;
        if !result.success {
            return Err(GuardError::Limited(Rejection::from_result(
                &result,
                self.clock.now_ms(),
            )));
        }
        Ok(handler().await)
    }

    /// Response headers for a decision.
    pub fn headers(&self, result: &RateLimitResult) -> RateLimitHeaders {
        RateLimitHeaders::from_result(result, self.clock.now_ms())
    }

    async fn key_for(&self, action: ActionType, actor: &Actor) -> Result<RateLimitKey> {
        let identifier = actor.resolve(self.resolver.as_ref()).await?;
        Ok(RateLimitKey::new(&self.namespace, action, identifier))
    }

    fn effective_config(&self, action: ActionType, role: Role) -> ActionConfig {
        self.roles.apply(self.actions.get(action), role)
    }

    async fn inspect(
        &self,
        action: ActionType,
        actor: &Actor,
    ) -> Result<(WindowOutcome, ActionConfig, Backend)> {
        let key = self.key_for(action, actor).await?;
        let config = self.effective_config(action, actor.role);
        let now = self.clock.now_ms();
        let (snapshot, backend) = self
            .peek(&key.to_store_key(), config.window_ms, now)
            .await?;
        let outcome = window::inspect(snapshot, config.max_requests, config.window_ms, now);
        Ok((outcome, config, backend))
    }

    /// The local store counts as of `now`, the same instant the outcome is
    /// evaluated at, so its reset time is exactly window start plus window.
    async fn increment(
        &self,
        key: &str,
        window_ms: u64,
        now: u64,
    ) -> Result<(CounterSnapshot, Backend)> {
        if let Some(ref centralized) = self.centralized {
            match centralized.increment_and_expire(key, window_ms).await {
                Ok(snapshot) => return Ok((snapshot, Backend::Centralized)),
                Err(e) => self.note_degraded(&e),
            }
        }
        Ok((self.local.increment_at(key, window_ms, now), Backend::Local))
    }

    async fn peek(
        &self,
        key: &str,
        window_ms: u64,
        now: u64,
    ) -> Result<(Option<CounterSnapshot>, Backend)> {
        if let Some(ref centralized) = self.centralized {
            match centralized.snapshot(key, window_ms).await {
                Ok(snapshot) => return Ok((snapshot, Backend::Centralized)),
                Err(e) => self.note_degraded(&e),
            }
        }
        Ok((self.local.snapshot_at(key, window_ms, now), Backend::Local))
    }

    async fn reset_key(&self, key: &str) {
        if let Some(ref centralized) = self.centralized {
            if let Err(e) = centralized.reset(key).await {
                self.note_degraded(&e);
            }
        }
        // The local store cannot fail, and may hold counts from degraded calls.
        let _ = self.local.reset(key).await;
    }

    fn note_degraded(&self, error: &LimiterError) {
        if !self.degraded_warned.swap(true, Ordering::Relaxed) {
            warn!(
                error = %error,
                "Centralized counter store unavailable, falling back to in-process counters"
            );
        } else {
            debug!(error = %error, "Centralized counter store call failed, using in-process counters");
        }
    }
}

fn build_result(outcome: WindowOutcome, config: &ActionConfig, backend: Backend) -> RateLimitResult {
    RateLimitResult {
        success: outcome.success,
        count: outcome.count,
        limit: config.max_requests,
        remaining_requests: outcome.remaining,
        reset_time: to_datetime(outcome.reset_at_ms),
        message: (!outcome.success).then(|| config.message.clone()),
        backend,
    }
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}
