//! Activity Limiter - per-action rate limiting for social blogging activity
//!
//! This crate decides whether an actor (a signed-in user or a client IP) may
//! perform an action such as posting, liking or following. Counters use a
//! fixed window kept in a centralized store so every instance sees the same
//! count, and fall back to an in-process map when that store is absent or
//! failing.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{LimiterError, Result, StoreError};
pub use ratelimit::{ActionType, Actor, RateLimitResult, RateLimitStatus, RateLimiter};
