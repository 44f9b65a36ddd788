// Moderation actuator - applies an escalation against the chat platform.
//
// The platform is reached through the `ModerationApi` port; the telegram
// client in infra implements it. Each remote call is best effort: a failed
// restrict does not stop the delete, and nothing is retried.

use super::moderation_models::{ChatEvent, EnforcementOutcome, EnforcementStrategy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{method} rejected: {description}")]
    Api { method: String, description: String },

    #[error("Could not decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("Failed to restrict user {user_id} in chat {chat_id}: {source}")]
    Restrict {
        user_id: i64,
        chat_id: i64,
        source: ApiError,
    },

    #[error("Failed to delete message {message_id} in chat {chat_id}: {source}")]
    Delete {
        message_id: i64,
        chat_id: i64,
        source: ApiError,
    },
}

// ============================================================================
// PLATFORM PORT
// ============================================================================

/// The chat platform calls moderation needs. Each returns the platform's
/// description string on success.
#[async_trait]
pub trait ModerationApi: Send + Sync {
    async fn restrict_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        until: DateTime<Utc>,
        can_send_media: bool,
    ) -> Result<String, ApiError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<String, ApiError>;
}

// ============================================================================
// ACTUATOR
// ============================================================================

pub struct ModerationActuator<A: ModerationApi> {
    api: A,
    strategy: EnforcementStrategy,
    restrict_duration: Duration,
}

impl<A: ModerationApi> ModerationActuator<A> {
    pub fn new(api: A, strategy: EnforcementStrategy, restrict_duration: Duration) -> Self {
        Self {
            api,
            strategy,
            restrict_duration,
        }
    }

    /// Enforce against the sender of `event`.
    ///
    /// Restrict (when the strategy asks for it) always goes first, then the
    /// delete. Failures are logged and reported in the outcome.
    pub async fn enforce(&self, event: &ChatEvent) -> EnforcementOutcome {
        let mut outcome = EnforcementOutcome::default();

        if self.strategy == EnforcementStrategy::RestrictAndDelete {
            let restricted = match self.restrict(event).await {
                Ok(description) => {
                    tracing::debug!(
                        user_id = event.sender_id,
                        chat_id = event.chat_id,
                        "restrictChatMember: {}",
                        description
                    );
                    true
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    false
                }
            };
            outcome.restricted = Some(restricted);
        }

        outcome.deleted = match self.delete(event).await {
            Ok(description) => {
                tracing::debug!(
                    message_id = event.message_id,
                    chat_id = event.chat_id,
                    "deleteMessage: {}",
                    description
                );
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        };

        outcome
    }

    async fn restrict(&self, event: &ChatEvent) -> Result<String, ActuationError> {
        let until = restriction_end(Utc::now(), self.restrict_duration);

        self.api
            .restrict_chat_member(event.chat_id, event.sender_id, until, false)
            .await
            .map_err(|source| ActuationError::Restrict {
                user_id: event.sender_id,
                chat_id: event.chat_id,
                source,
            })
    }

    async fn delete(&self, event: &ChatEvent) -> Result<String, ActuationError> {
        self.api
            .delete_message(event.chat_id, event.message_id)
            .await
            .map_err(|source| ActuationError::Delete {
                message_id: event.message_id,
                chat_id: event.chat_id,
                source,
            })
    }
}

fn restriction_end(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    // chrono::Duration::from_std only fails past ~292 billion years
    now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::days(1))
}

// ============================================================================
// TESTS
// ============================================================================
