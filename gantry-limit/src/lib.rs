pub mod identifier;
pub mod sliding_window;
pub mod store;
pub mod token_bucket;

pub use sliding_window::SlidingWindowLimiter;
pub use store::{RateLimitStore, StoreError};
pub use token_bucket::TokenBucketLimiter;

use std::time::Duration;

/// Outcome of one atomic check-and-record call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window/bucket, floored at zero.
    pub remaining: u64,
    /// Unix seconds at which the limit fully resets.
    pub reset_at: i64,
    /// How long to wait before retrying; zero when allowed.
    pub retry_after: Duration,
}
