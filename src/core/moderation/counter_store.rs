// Counter store port - the only thing the limiter needs from a key-value store.

use super::moderation_models::RateLimitKey;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    /// Network or cluster failure. Retryable in principle, but callers drop the event.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Expiring counters keyed by `RateLimitKey`.
///
/// Implementations must make the increment atomic, and must set the expiry
/// only on the increment that creates the counter. Later increments inside
/// the window leave the expiry untouched.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter and return the post-increment value.
    async fn increment_with_window(
        &self,
        key: &RateLimitKey,
        window: Duration,
    ) -> Result<i64, CounterError>;
}
