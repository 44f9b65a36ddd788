// Wire model of the Telegram `Update` object, reduced to the fields the
// moderator reads. Media payloads are never inspected, only their presence.

use crate::core::moderation::{ChatEvent, ContentKind, InboundUpdate};
use serde::de::IgnoredAny;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Missing for channel posts
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub sticker: Option<IgnoredAny>,
    #[serde(default)]
    pub photo: Option<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Message {
    fn content_kind(&self) -> ContentKind {
        if self.sticker.is_some() {
            ContentKind::Sticker
        } else if self.photo.is_some() {
            ContentKind::Photo
        } else {
            ContentKind::Other
        }
    }
}

impl From<Update> for InboundUpdate {
    fn from(update: Update) -> Self {
        let message = update.message.and_then(|message| {
            let kind = message.content_kind();
            let sender = message.from?;
            Some(ChatEvent {
                sender_id: sender.id,
                chat_id: message.chat.id,
                message_id: message.message_id,
                content_kind: kind,
                sender_display_name: sender.username.unwrap_or(sender.first_name),
            })
        });

        InboundUpdate {
            update_id: update.update_id,
            message,
        }
    }
}
