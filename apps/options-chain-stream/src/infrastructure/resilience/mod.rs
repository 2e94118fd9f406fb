//! Resilience patterns for outbound REST calls.
//!
//! - [`RateLimiter`]: minimum interval between granted calls
//! - [`RetryPolicy`]: bounded exponential backoff for idempotent operations
//!
//! Both observe a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! during every wait.

mod rate_limit;
mod retry;

pub use rate_limit::{RateLimitError, RateLimiter};
pub use retry::{RetryError, RetryPolicy};
