// Telegram layer - turns webhook deliveries into core updates.

#[path = "updates.rs"]
pub mod updates;

#[path = "webhook.rs"]
pub mod webhook;

pub use webhook::{build_router, WebhookState};
