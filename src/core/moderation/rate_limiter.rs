// Rate limiter - turns a chat event into a moderation decision.
//
// NO Telegram dependencies here, the store is reached through `CounterStore`.

use super::counter_store::CounterStore;
use super::moderation_models::{ChatEvent, ModerationConfig, ModerationDecision, RateLimitKey};

/// Counts flagged content per user and decides when a user crossed the line.
pub struct RateLimiter<S: CounterStore> {
    store: S,
    config: ModerationConfig,
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn new(store: S, config: ModerationConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate one event.
    ///
    /// Unmonitored content never reaches the store. A store failure yields
    /// `Ignore`: an outage must not punish anybody.
    pub async fn evaluate(&self, event: &ChatEvent) -> ModerationDecision {
        if !self.config.is_monitored(event.content_kind) {
            return ModerationDecision::Ignore;
        }

        let key = RateLimitKey::for_user(&self.config.key_domain, event.sender_id);

        let count = match self
            .store
            .increment_with_window(&key, self.config.window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(key = %key, "Skipping rate-limit check: {}", e);
                return ModerationDecision::Ignore;
            }
        };

        if count > self.config.threshold {
            ModerationDecision::Escalate { count }
        } else {
            ModerationDecision::Allow { count }
        }
    }
}
