//! Cross-invocation rate limiting for outbound requests.
//!
//! There is no long-lived coordinating process: each invocation evaluates
//! the token bucket against a persisted per-host budget, inside one atomic
//! read-modify-write, so concurrent invocations cooperate instead of each
//! believing they hold the last token.

mod backoff;
mod limiter;

pub use backoff::{retry_async, BackoffConfig};
pub use limiter::{Decision, HostBudget, RateLimiter};
