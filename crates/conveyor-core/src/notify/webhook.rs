//! HTTP webhook recipient (SMS/email gateways, chat hooks).

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::event::NotificationEvent;
use super::recipient::Recipient;
use crate::domain::error::{ConveyorError, Result};

/// Request timeout used by [`WebhookRecipient::new`].
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// POSTs each event as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookRecipient {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookRecipient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Recipient whose requests are abandoned after `timeout`.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConveyorError::Config(format!(
                "webhook url must be http(s): {url}"
            )));
        }
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("conveyor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| ConveyorError::Config(format!("http client: {e}")))?;
        Ok(Self { url, http_client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Recipient for WebhookRecipient {
    fn name(&self) -> &str {
        &self.url
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| ConveyorError::Delivery(format!("{}: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConveyorError::Delivery(format!(
                "{} responded {status}",
                self.url
            )));
        }
        debug!(url = %self.url, stage = %event.stage, "webhook delivered");
        Ok(())
    }
}
