//! Rate limit response headers and the rejection produced by a guarded handler.

use serde::Serialize;
use thiserror::Error;

use super::limiter::RateLimitResult;
use crate::error::LimiterError;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_BACKEND: &str = "X-RateLimit-Backend";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// HTTP status a denial maps to.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Standard rate limit headers for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Reset time in epoch seconds
    pub reset: i64,
    pub backend: &'static str,
    /// Seconds to wait, present only on denial
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Build headers for a decision made at `now_ms`.
    pub fn from_result(result: &RateLimitResult, now_ms: u64) -> Self {
        let reset_ms = result.reset_time.timestamp_millis().max(0) as u64;
        let retry_after = if result.success {
            None
        } else {
            Some(retry_after_secs(reset_ms, now_ms))
        };

        Self {
            limit: result.limit,
            remaining: result.remaining_requests,
            reset: result.reset_time.timestamp(),
            backend: result.backend.as_str(),
            retry_after,
        }
    }

    /// Header name/value pairs in a stable order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
            (HEADER_BACKEND, self.backend.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }
}

/// Whole seconds until `reset_ms`, rounded up, never less than one.
fn retry_after_secs(reset_ms: u64, now_ms: u64) -> u64 {
    let wait_ms = reset_ms.saturating_sub(now_ms);
    wait_ms.div_ceil(1_000).max(1)
}

/// A request refused by the limiter, ready to become a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub message: String,
    pub retry_after_secs: u64,
    pub headers: RateLimitHeaders,
}

impl Rejection {
    pub fn from_result(result: &RateLimitResult, now_ms: u64) -> Self {
        let headers = RateLimitHeaders::from_result(result, now_ms);
        Self {
            message: result.message.clone().unwrap_or_default(),
            retry_after_secs: headers.retry_after.unwrap_or(1),
            headers,
        }
    }

    pub fn status_code(&self) -> u16 {
        TOO_MANY_REQUESTS
    }
}

/// Why a guarded handler did not run.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The actor is over quota
    #[error("{}", .0.message)]
    Limited(Rejection),

    /// The limiter itself failed (identity resolution)
    #[error(transparent)]
    Limiter(#[from] LimiterError),
}
