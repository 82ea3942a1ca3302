//! Rate limiting logic and state management.

mod action;
mod backend;
mod clock;
mod counter;
mod headers;
mod key;
mod limiter;
mod metrics;
mod window;

pub use action::{ActionConfig, ActionOverride, ActionTable, ActionType, Role, RoleMultipliers};
pub use backend::{Backend, CounterBackend, CounterSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterRecord, LocalStore, Sweeper};
pub use headers::{GuardError, RateLimitHeaders, Rejection};
pub use key::{
    Actor, Identifier, Identity, IdentityResolver, NoSession, RateLimitKey, DEFAULT_NAMESPACE,
    UNKNOWN_IDENTIFIER,
};
pub use limiter::{RateLimitResult, RateLimitStatus, RateLimiter};
pub use metrics::{MemoryMetrics, MetricEvent, MetricsSink, TracingMetrics};
pub use window::{evaluate, inspect, WindowOutcome};
