//! Outbound webhook notifier.
//!
//! Flow owners register one target URL per event name. On a milestone the
//! engine asks the notifier to dispatch; with no registration this is a
//! silent no-op. Delivery is fire-and-forget: failures are logged, never
//! retried, and never fail the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::store::Store;

/// The closed set of webhook event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEvent {
    OnboardingCompleted,
    CustomerAdded,
    StepCompleted,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnboardingCompleted => "onboarding.completed",
            Self::CustomerAdded => "customer.added",
            Self::StepCompleted => "step.completed",
        }
    }
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered webhook subscription: one URL per (owner, event).
#[derive(Debug, Clone, Serialize)]
pub struct WebhookRegistration {
    pub id: Uuid,
    pub user_id: String,
    pub event: String,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
}

/// The JSON envelope POSTed to subscriber URLs.
#[derive(Debug, Serialize)]
struct WebhookEnvelope<'a> {
    event: &'a str,
    payload: &'a serde_json::Value,
    timestamp: DateTime<Utc>,
}

/// Seam for emitting webhook events, so the engine can run against a
/// recording fake in tests.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Dispatch `event` to the URL `owner` registered for it, if any.
    ///
    /// Never returns an error: delivery problems are logged and swallowed.
    async fn dispatch(&self, owner: &str, event: WebhookEvent, payload: serde_json::Value);
}

/// HTTP webhook notifier backed by the store's registration table.
pub struct HttpWebhookNotifier {
    store: Arc<dyn Store>,
    client: reqwest::Client,
}

impl HttpWebhookNotifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// POST the envelope to `url`, mapping non-2xx and transport errors.
    async fn post(
        &self,
        url: &str,
        event: WebhookEvent,
        payload: &serde_json::Value,
    ) -> Result<(), WebhookError> {
        let envelope = WebhookEnvelope {
            event: event.as_str(),
            payload,
            timestamp: Utc::now(),
        };

        let resp = self
            .client
            .post(url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| WebhookError::PostFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(WebhookError::BadStatus {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookNotifier {
    async fn dispatch(&self, owner: &str, event: WebhookEvent, payload: serde_json::Value) {
        let registration = match self.store.webhook_for_event(owner, event.as_str()).await {
            Ok(Some(reg)) => reg,
            // No subscription — not an error, nothing to send
            Ok(None) => return,
            Err(e) => {
                tracing::error!(owner, event = %event, "Webhook lookup failed: {e}");
                return;
            }
        };

        match self.post(&registration.target_url, event, &payload).await {
            Ok(()) => {
                tracing::debug!(owner, event = %event, url = %registration.target_url, "Webhook delivered");
            }
            Err(e) => {
                tracing::warn!(owner, event = %event, "Webhook delivery failed: {e}");
            }
        }
    }
}
