//! Outbound notification channels.
//!
//! A flow step renders into a [`Notification`] (personalization tokens
//! substituted, channel defaults applied) and the [`ChannelRouter`] hands it
//! to the matching sender. Channels are configured independently from the
//! environment; a step targeting an unconfigured channel fails with
//! `ChannelDisabled`, which the engine records against that enrollment.

pub mod email;
pub mod push;
pub mod sms;
pub mod telegram;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::NotifyError;
use crate::model::{Customer, StepContent};
use crate::substitution::substitute;

pub use email::{EmailConfig, EmailSender};
pub use push::FcmSender;
pub use sms::TwilioSender;
pub use telegram::TelegramSender;

/// A fully rendered, ready-to-send message.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Email {
        to: String,
        subject: String,
        body: String,
    },
    Sms {
        phone: String,
        message: String,
    },
    Telegram {
        chat_id: String,
        message: String,
    },
    Push {
        token: String,
        title: String,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl Notification {
    /// Render a step's content for a customer, or `None` for steps that
    /// send nothing (delays).
    ///
    /// WhatsApp steps relay through the SMS channel — same recipient
    /// number, same message body.
    pub fn from_step(
        content: &StepContent,
        customer: &Customer,
        config: &EngineConfig,
    ) -> Option<Self> {
        match content {
            StepContent::Email { subject, body } => Some(Self::Email {
                to: customer.email.clone(),
                subject: substitute(
                    subject.as_deref().unwrap_or(&config.default_email_subject),
                    customer,
                ),
                body: substitute(body, customer),
            }),
            StepContent::Sms { phone, message } | StepContent::Whatsapp { phone, message } => {
                Some(Self::Sms {
                    phone: phone.clone(),
                    message: substitute(message, customer),
                })
            }
            StepContent::Telegram { chat_id, message } => Some(Self::Telegram {
                chat_id: chat_id.clone(),
                message: substitute(message, customer),
            }),
            StepContent::Push {
                token,
                title,
                message,
                data,
            } => Some(Self::Push {
                token: token.clone(),
                title: substitute(
                    title.as_deref().unwrap_or(&config.default_push_title),
                    customer,
                ),
                message: substitute(message, customer),
                data: data.clone(),
            }),
            StepContent::Delay { .. } => None,
        }
    }

    /// Channel name, for logs and errors.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Sms { .. } => "sms",
            Self::Telegram { .. } => "telegram",
            Self::Push { .. } => "push",
        }
    }
}

/// Seam between the engine and the delivery channels. The engine only sees
/// this trait; tests substitute a recording fake.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Routes notifications to the channel senders that are configured.
///
/// Each sender is `None` when its environment variables are absent, and
/// sending on a disabled channel is an error rather than a silent drop.
#[derive(Default)]
pub struct ChannelRouter {
    email: Option<EmailSender>,
    sms: Option<TwilioSender>,
    telegram: Option<TelegramSender>,
    push: Option<FcmSender>,
}

impl ChannelRouter {
    /// Build the router from environment variables, enabling each channel
    /// whose credentials are present.
    pub fn from_env() -> Self {
        let router = Self {
            email: EmailConfig::from_env().map(EmailSender::new),
            sms: TwilioSender::from_env(),
            telegram: TelegramSender::from_env(),
            push: FcmSender::from_env(),
        };

        tracing::info!(
            email = router.email.is_some(),
            sms = router.sms.is_some(),
            telegram = router.telegram.is_some(),
            push = router.push.is_some(),
            "Notification channels configured"
        );
        router
    }

    fn disabled(channel: &str) -> NotifyError {
        NotifyError::ChannelDisabled {
            channel: channel.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSender for ChannelRouter {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Email { to, subject, body } => self
                .email
                .as_ref()
                .ok_or_else(|| Self::disabled("email"))?
                .send(&to, &subject, &body),
            Notification::Sms { phone, message } => {
                self.sms
                    .as_ref()
                    .ok_or_else(|| Self::disabled("sms"))?
                    .send(&phone, &message)
                    .await
            }
            Notification::Telegram { chat_id, message } => {
                self.telegram
                    .as_ref()
                    .ok_or_else(|| Self::disabled("telegram"))?
                    .send(&chat_id, &message)
                    .await
            }
            Notification::Push {
                token,
                title,
                message,
                data,
            } => {
                self.push
                    .as_ref()
                    .ok_or_else(|| Self::disabled("push"))?
                    .send(&token, &title, &message, data.as_ref())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn customer(name: Option<&str>) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            name: name.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn email_renders_with_substitution_and_default_subject() {
        let config = EngineConfig::default();
        let content = StepContent::Email {
            subject: None,
            body: "Hi {{name}}, your login is {{email}}".to_string(),
        };

        let rendered = Notification::from_step(&content, &customer(Some("Ana")), &config).unwrap();
        assert_eq!(
            rendered,
            Notification::Email {
                to: "ana@example.com".to_string(),
                subject: "Welcome!".to_string(),
                body: "Hi Ana, your login is ana@example.com".to_string(),
            }
        );
    }

    #[test]
    fn whatsapp_relays_through_sms() {
        let config = EngineConfig::default();
        let content = StepContent::Whatsapp {
            phone: "+5511999990000".to_string(),
            message: "Oi {{nome_do_cliente}}!".to_string(),
        };

        let rendered = Notification::from_step(&content, &customer(Some("Ana")), &config).unwrap();
        assert_eq!(
            rendered,
            Notification::Sms {
                phone: "+5511999990000".to_string(),
                message: "Oi Ana!".to_string(),
            }
        );
        assert_eq!(rendered.channel(), "sms");
    }

    #[test]
    fn delay_renders_nothing() {
        let config = EngineConfig::default();
        let content = StepContent::Delay { delay_in_days: 3 };
        assert!(Notification::from_step(&content, &customer(None), &config).is_none());
    }

    #[test]
    fn push_title_defaults() {
        let config = EngineConfig::default();
        let content = StepContent::Push {
            token: "tok-1".to_string(),
            title: None,
            message: "hello".to_string(),
            data: None,
        };

        let rendered = Notification::from_step(&content, &customer(None), &config).unwrap();
        let Notification::Push { title, .. } = rendered else {
            panic!("expected push");
        };
        assert_eq!(title, "Notification");
    }

    #[tokio::test]
    async fn unconfigured_channel_is_an_error() {
        let router = ChannelRouter::default();
        let result = router
            .send(Notification::Sms {
                phone: "+1555".to_string(),
                message: "hi".to_string(),
            })
            .await;

        assert!(matches!(
            result,
            Err(NotifyError::ChannelDisabled { channel }) if channel == "sms"
        ));
    }
}
