//! Fixed-window decision logic.
//!
//! The window is anchored by the backend: at the first request's timestamp for
//! the in-process store, or at the TTL attached on first increment for the
//! centralized store. Either way the backend reports the time left in the
//! window, so the same arithmetic serves both.

use super::backend::CounterSnapshot;

/// Result of evaluating one counter against a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Requests counted in the window, including this one for a check
    pub count: u64,
    /// Whether the request fits in the quota
    pub success: bool,
    /// Requests left in the window
    pub remaining: u64,
    /// When the window resets (epoch ms)
    pub reset_at_ms: u64,
}

/// Evaluate a counter that was just incremented.
pub fn evaluate(snapshot: CounterSnapshot, max_requests: u64, now_ms: u64) -> WindowOutcome {
    WindowOutcome {
        count: snapshot.count,
        success: snapshot.count <= max_requests,
        remaining: max_requests.saturating_sub(snapshot.count),
        reset_at_ms: now_ms.saturating_add(snapshot.ttl_ms),
    }
}

/// Evaluate a counter read without incrementing it.
///
/// An absent counter means a full quota and a window that would start now.
pub fn inspect(
    snapshot: Option<CounterSnapshot>,
    max_requests: u64,
    window_ms: u64,
    now_ms: u64,
) -> WindowOutcome {
    let snapshot = snapshot.unwrap_or(CounterSnapshot {
        count: 0,
        ttl_ms: window_ms,
    });
    let remaining = max_requests.saturating_sub(snapshot.count);
    WindowOutcome {
        count: snapshot.count,
        success: remaining > 0,
        remaining,
        reset_at_ms: now_ms.saturating_add(snapshot.ttl_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_within_limit() {
        let outcome = evaluate(CounterSnapshot { count: 1, ttl_ms: 60_000 }, 3, 1_000);
        assert!(outcome.success);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(outcome.reset_at_ms, 61_000);
    }

    #[test]
    fn test_evaluate_at_and_over_limit() {
        let at = evaluate(CounterSnapshot { count: 3, ttl_ms: 10 }, 3, 0);
        assert!(at.success);
        assert_eq!(at.remaining, 0);

        let over = evaluate(CounterSnapshot { count: 4, ttl_ms: 10 }, 3, 0);
        assert!(!over.success);
        assert_eq!(over.remaining, 0);
    }

    #[test]
    fn test_evaluate_zero_quota_denies_everything() {
        let outcome = evaluate(CounterSnapshot { count: 1, ttl_ms: 10 }, 0, 0);
        assert!(!outcome.success);
        assert_eq!(outcome.remaining, 0);
    }

    #[test]
    fn test_inspect_absent_counter() {
        let outcome = inspect(None, 5, 60_000, 1_000);
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.remaining, 5);
        assert!(outcome.success);
        assert_eq!(outcome.reset_at_ms, 61_000);
    }

    #[test]
    fn test_inspect_exhausted_counter() {
        let outcome = inspect(Some(CounterSnapshot { count: 5, ttl_ms: 500 }), 5, 60_000, 1_000);
        assert_eq!(outcome.remaining, 0);
        assert!(!outcome.success);
        assert_eq!(outcome.reset_at_ms, 1_500);
    }
}
