//! Telegram channel — sends messages via the Bot API.

use crate::error::NotifyError;

/// Telegram sender — posts to the Bot API's sendMessage method.
pub struct TelegramSender {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramSender {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    /// Build the sender from environment variables.
    /// Returns `None` if `TELEGRAM_BOT_TOKEN` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        std::env::var("TELEGRAM_BOT_TOKEN").ok().map(Self::new)
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Send a text message to a chat.
    pub async fn send(&self, chat_id: &str, message: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                channel: "telegram".to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                channel: "telegram".to_string(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        tracing::info!("Telegram message sent to chat {chat_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_token() {
        let sender = TelegramSender::new("123:ABC".into());
        assert_eq!(
            sender.api_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }
}
