//! SMS channel — Twilio Messages API.
//!
//! WhatsApp steps are also delivered through this sender; the router hands
//! them over as plain SMS notifications.

use crate::error::NotifyError;

/// SMS sender backed by Twilio.
pub struct TwilioSender {
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioSender {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            client: reqwest::Client::new(),
        }
    }

    /// Build the sender from environment variables.
    /// Returns `None` if `TWILIO_ACCOUNT_SID` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
        let from_number = std::env::var("TWILIO_FROM_NUMBER").unwrap_or_default();
        Some(Self::new(account_sid, auth_token, from_number))
    }

    fn api_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        )
    }

    /// Send a text message to a phone number.
    pub async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError> {
        let params = [
            ("To", phone),
            ("From", self.from_number.as_str()),
            ("Body", message),
        ];

        let resp = self
            .client
            .post(self.api_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                channel: "sms".to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                channel: "sms".to_string(),
                reason: format!("Twilio returned {status}: {body}"),
            });
        }

        tracing::info!("SMS sent to {phone}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_account_sid() {
        let sender = TwilioSender::new("AC123".into(), "tok".into(), "+15550001111".into());
        assert_eq!(
            sender.api_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }
}
