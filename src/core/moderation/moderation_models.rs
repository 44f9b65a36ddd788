// Moderation domain models - data structures for the flagged-content limiter.
//
// These are pure domain types with no Telegram dependencies.
// The telegram layer converts webhook payloads into these.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// What kind of content a message carries, as far as moderation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Sticker,
    Photo,
    /// Text, documents, voice... anything we never count
    Other,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Sticker => write!(f, "sticker"),
            ContentKind::Photo => write!(f, "photo"),
            ContentKind::Other => write!(f, "other"),
        }
    }
}

/// A single inbound chat message, already stripped of platform details.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub sender_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub content_kind: ContentKind,
    /// Username if the sender has one, first name otherwise. Only used in logs.
    pub sender_display_name: String,
}

/// One item on the ingestion queue.
///
/// Telegram delivers plenty of updates that are not user messages (channel
/// posts, member changes, callbacks). Those arrive with `message: None` and
/// the ingestion loop skips them.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub message: Option<ChatEvent>,
}

/// Identifies one user's counter inside one moderation domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build the key for a user.
    ///
    /// The user id is wrapped in braces so that, on a Redis Cluster, every
    /// key belonging to one user hashes to the same slot.
    pub fn for_user(domain: &str, user_id: i64) -> Self {
        Self(format!("{}:{{{}}}", domain, user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of evaluating one event against the user's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationDecision {
    /// Not monitored content, or the store could not be reached
    Ignore,
    /// Counted, still within the threshold
    Allow { count: i64 },
    /// Counted and over the threshold - enforce
    Escalate { count: i64 },
}

/// Which remote actions the actuator issues on escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementStrategy {
    /// Delete the offending message, leave the member alone
    DeleteOnly,
    /// Revoke media rights for a while, then delete the message
    #[default]
    RestrictAndDelete,
}

/// Summary of what one `enforce` call managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnforcementOutcome {
    /// `None` when the strategy does not restrict at all
    pub restricted: Option<bool>,
    pub deleted: bool,
}

/// Tunables for the limiter and actuator.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Counts strictly above this escalate
    pub threshold: i64,
    /// Lifetime of a counter, measured from its first increment
    pub window: Duration,
    /// How long a restricted member stays unable to send media
    pub restrict_duration: Duration,
    pub monitored_kinds: HashSet<ContentKind>,
    pub strategy: EnforcementStrategy,
    /// Prefix of every rate-limit key
    pub key_domain: String,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window: Duration::from_secs(60 * 60 * 24),
            restrict_duration: Duration::from_secs(60 * 60 * 24),
            monitored_kinds: [ContentKind::Sticker, ContentKind::Photo]
                .into_iter()
                .collect(),
            strategy: EnforcementStrategy::RestrictAndDelete,
            key_domain: "flagged".to_string(),
        }
    }
}

impl ModerationConfig {
    pub fn is_monitored(&self, kind: ContentKind) -> bool {
        self.monitored_kinds.contains(&kind)
    }
}
