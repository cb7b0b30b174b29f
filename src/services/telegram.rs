// src/services/telegram.rs

//! Bot API client used to deliver notifications.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Reply to a single bot API call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotReply {
    pub ok: bool,
    pub message_id: Option<i64>,
    pub description: Option<String>,
}

/// A messaging destination that accepts text messages.
///
/// `Err` means the call never produced a well-formed reply (connection
/// failure, timeout, garbage body). A well-formed refusal is `Ok` with
/// `ok == false`.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<BotReply, DeliveryError>;

    async fn pin_message(&self, chat_id: &str, message_id: i64) -> Result<BotReply, DeliveryError>;
}

/// Telegram bot API client.
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct PinMessageRequest<'a> {
    chat_id: &'a str,
    message_id: i64,
    disable_notification: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<ApiResult>,
    #[serde(default)]
    description: Option<String>,
}

/// `result` is a message object for sendMessage and a bare `true` for pins.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResult {
    Message { message_id: i64 },
    Other(serde_json::Value),
}

impl TelegramClient {
    /// The client is expected to carry the request timeout.
    pub fn new(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.base_url.trim_end_matches('/'),
            self.token,
            method
        )
    }

    async fn call<T: Serialize + Sync>(&self, method: &str, body: &T) -> Result<BotReply, DeliveryError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::transient(e.without_url()))?;

        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::transient(e.without_url()))?;

        parse_reply(&text)
    }
}

/// Parse a bot API response body.
fn parse_reply(body: &str) -> Result<BotReply, DeliveryError> {
    let parsed: ApiResponse = serde_json::from_str(body)
        .map_err(|e| DeliveryError::transient(format!("unreadable bot API reply: {e}")))?;

    let message_id = match parsed.result {
        Some(ApiResult::Message { message_id }) => Some(message_id),
        _ => None,
    };

    Ok(BotReply {
        ok: parsed.ok,
        message_id,
        description: parsed.description,
    })
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<BotReply, DeliveryError> {
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        self.call("sendMessage", &body).await
    }

    async fn pin_message(&self, chat_id: &str, message_id: i64) -> Result<BotReply, DeliveryError> {
        let body = PinMessageRequest {
            chat_id,
            message_id,
            disable_notification: true,
        };
        self.call("pinChatMessage", &body).await
    }
}
