use crate::error::ChatError;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{ChatChannel, ChatMessage, SendReceipt};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Teams rejects cards much above ~28 KB.
const MAX_CARD_TEXT: usize = 20_000;

const THEME_COLOR: &str = "0076D7";

/// Legacy Office 365 connector card accepted by Teams incoming webhooks.
#[derive(Debug, Serialize)]
struct MessageCard<'a> {
    #[serde(rename = "@type")]
    card_type: &'static str,
    #[serde(rename = "@context")]
    context: &'static str,
    summary: &'a str,
    #[serde(rename = "themeColor")]
    theme_color: &'static str,
    title: &'a str,
    text: String,
}

/// Microsoft Teams 传入 Webhook 渠道
pub struct TeamsChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl TeamsChannel {
    pub fn new(webhook_url: &str, timeout_secs: u64) -> Result<Self, ChatError> {
        let url = webhook_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ChatError::InvalidConfig(format!(
                "webhook url must be http(s): '{url}'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| ChatError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            webhook_url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl ChatChannel for TeamsChannel {
    async fn send(&self, message: &ChatMessage) -> Result<SendReceipt, ChatError> {
        let card = MessageCard {
            card_type: "MessageCard",
            context: "https://schema.org/extensions",
            summary: &message.title,
            theme_color: THEME_COLOR,
            title: &message.title,
            text: truncate_string(&message.text, MAX_CARD_TEXT),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&card)
            .send()
            .await
            .map_err(|e| {
                let err = ChatError::from_transport(&e);
                tracing::warn!(error = %e, ambiguous = err.is_ambiguous(), "Teams send failed");
                err
            })?;

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        // 请求已被对方接收，读取响应失败时结果不确定
        let body = resp
            .text()
            .await
            .map_err(|e| ChatError::Ambiguous(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ChatError::Rejected {
                status: status.as_u16(),
                body: truncate_string(&body, MAX_BODY_LENGTH),
            });
        }

        let message_id = Some(body.trim())
            .filter(|b| !b.is_empty())
            .map(|b| b.chars().take(255).collect::<String>())
            .or(request_id);

        tracing::debug!(status = %status, message_id = ?message_id, "Teams message posted");
        Ok(SendReceipt {
            message_id,
            http_status: status.as_u16(),
        })
    }

    fn channel_name(&self) -> &str {
        "teams"
    }
}
