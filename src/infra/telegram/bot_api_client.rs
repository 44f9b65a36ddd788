use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::moderation::{ApiError, ModerationApi};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal Telegram Bot API client. It only exposes the calls the bot needs.
/// Clones share the connection pool.
#[derive(Clone)]
pub struct TelegramBotClient {
    client: Client,
    /// `<api_base>/bot<token>`; never logged
    base_url: String,
}

impl TelegramBotClient {
    /// `proxy` is a SOCKS5 address (`host:port`) or a full proxy URL.
    pub fn new(api_base: &str, token: &str, proxy: Option<&str>) -> Result<Self, ApiError> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy_url(proxy)).map_err(|e| ApiError::Transport(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    /// Point Telegram at our webhook. Returns Telegram's description.
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<String, ApiError> {
        self.call(
            "setWebhook",
            &SetWebhook {
                url,
                secret_token,
                allowed_updates: &["message"],
            },
        )
        .await
    }

    async fn call<P: Serialize + ?Sized>(&self, method: &str, payload: &P) -> Result<String, ApiError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(payload)
            .send()
            .await
            // The URL carries the token, keep it out of error messages
            .map_err(|e| ApiError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{} ({})", e.without_url(), status)))?;

        interpret(method, body)
    }
}

/// Turn a Bot API envelope into the description string or an error.
fn interpret(method: &str, body: ApiResponse) -> Result<String, ApiError> {
    if body.ok {
        Ok(body.description.unwrap_or_else(|| body.result.to_string()))
    } else {
        Err(ApiError::Api {
            method: method.to_string(),
            description: body
                .description
                .unwrap_or_else(|| format!("error code {}", body.error_code.unwrap_or_default())),
        })
    }
}

fn proxy_url(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("socks5://{}", proxy)
    }
}

#[async_trait]
impl ModerationApi for TelegramBotClient {
    async fn restrict_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        until: DateTime<Utc>,
        can_send_media: bool,
    ) -> Result<String, ApiError> {
        self.call(
            "restrictChatMember",
            &RestrictChatMember {
                chat_id,
                user_id,
                permissions: ChatPermissions::with_media(can_send_media),
                use_independent_chat_permissions: true,
                until_date: until.timestamp(),
            },
        )
        .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<String, ApiError> {
        self.call(
            "deleteMessage",
            &DeleteMessage {
                chat_id,
                message_id,
            },
        )
        .await
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct DeleteMessage {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct RestrictChatMember {
    chat_id: i64,
    user_id: i64,
    permissions: ChatPermissions,
    use_independent_chat_permissions: bool,
    until_date: i64,
}

/// Text stays allowed; every media permission follows `can_send_media`.
#[derive(Debug, Serialize, PartialEq)]
struct ChatPermissions {
    can_send_messages: bool,
    can_send_audios: bool,
    can_send_documents: bool,
    can_send_photos: bool,
    can_send_videos: bool,
    can_send_video_notes: bool,
    can_send_voice_notes: bool,
    /// Stickers, GIFs, games and inline bots
    can_send_other_messages: bool,
    can_add_web_page_previews: bool,
}

impl ChatPermissions {
    fn with_media(can_send_media: bool) -> Self {
        Self {
            can_send_messages: true,
            can_send_audios: can_send_media,
            can_send_documents: can_send_media,
            can_send_photos: can_send_media,
            can_send_videos: can_send_media,
            can_send_video_notes: can_send_media,
            can_send_voice_notes: can_send_media,
            can_send_other_messages: can_send_media,
            can_add_web_page_previews: can_send_media,
        }
    }
}
