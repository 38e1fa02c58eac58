//! Push channel — Firebase Cloud Messaging legacy HTTP API.

use crate::error::NotifyError;

const FCM_SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";

/// Push notification sender backed by FCM.
pub struct FcmSender {
    server_key: String,
    client: reqwest::Client,
}

impl FcmSender {
    pub fn new(server_key: String) -> Self {
        Self {
            server_key,
            client: reqwest::Client::new(),
        }
    }

    /// Build the sender from environment variables.
    /// Returns `None` if `FCM_SERVER_KEY` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        std::env::var("FCM_SERVER_KEY").ok().map(Self::new)
    }

    /// Send a push notification to a device token.
    pub async fn send(
        &self,
        token: &str,
        title: &str,
        message: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<(), NotifyError> {
        let mut body = serde_json::json!({
            "to": token,
            "notification": {
                "title": title,
                "body": message,
            },
        });
        if let Some(data) = data {
            body["data"] = data.clone();
        }

        let resp = self
            .client
            .post(FCM_SEND_URL)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                channel: "push".to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                channel: "push".to_string(),
                reason: format!("FCM returned {status}: {err}"),
            });
        }

        tracing::info!("Push notification sent to token {token}");
        Ok(())
    }
}
