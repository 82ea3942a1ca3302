//! Metric events emitted for each rate limit decision.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::action::ActionType;
use super::backend::Backend;

/// Metric type recorded for every check.
pub const RATE_LIMIT_METRIC: &str = "rate_limit_check";

/// A single observation handed to a [`MetricsSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    #[serde(rename = "type")]
    pub metric_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
}

impl MetricEvent {
    /// Build the event for one rate limit check; the value is the remaining quota.
    pub fn check(
        action: ActionType,
        backend: Backend,
        allowed: bool,
        remaining: u64,
        limit: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_type: RATE_LIMIT_METRIC.to_string(),
            value: remaining as f64,
            unit: "requests".to_string(),
            timestamp,
            context: json!({
                "action": action.as_str(),
                "backend": backend.as_str(),
                "allowed": allowed,
                "remaining": remaining,
                "limit": limit,
            }),
        }
    }
}

/// Destination for metric events. Sinks must not block.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Emits each event as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, event: MetricEvent) {
        info!(
            target: "activity_limiter::metrics",
            metric = %event.metric_type,
            value = event.value,
            unit = %event.unit,
            timestamp = %event.timestamp.to_rfc3339(),
            context = %event.context,
            "Rate limit metric"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the events recorded so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, event: MetricEvent) {
        self.events.lock().push(event);
    }
}
