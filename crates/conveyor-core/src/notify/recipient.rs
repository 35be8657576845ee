//! Recipient trait and the in-process recipients.

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::info;

use super::event::NotificationEvent;
use crate::domain::error::{ConveyorError, Result};

/// Something that receives stage outcome notifications.
#[async_trait]
pub trait Recipient: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Deliver one event. Called exactly once per event; no retry.
    async fn deliver(&self, event: &NotificationEvent) -> Result<()>;
}

/// Writes each event as a structured tracing line.
#[derive(Debug, Clone, Default)]
pub struct LogRecipient;

#[async_trait]
impl Recipient for LogRecipient {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        info!(
            event = "stage.notification",
            run_id = %event.run_id,
            stage = %event.stage,
            outcome = %event.outcome,
            reason = event.reason.as_deref().unwrap_or(""),
        );
        Ok(())
    }
}

/// Forwards events to an in-process subscriber.
///
/// Delivery never waits: when the subscriber's buffer is full the event is
/// dropped and reported as a delivery failure.
#[derive(Debug, Clone)]
pub struct ChannelRecipient {
    name: String,
    tx: mpsc::Sender<NotificationEvent>,
}

impl ChannelRecipient {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<NotificationEvent>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Recipient plus the receiving end, with room for `capacity` events.
    pub fn channel(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(name, tx), rx)
    }
}

#[async_trait]
impl Recipient for ChannelRecipient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => {
                ConveyorError::Delivery(format!("{}: subscriber buffer full", self.name))
            }
            TrySendError::Closed(_) => {
                ConveyorError::Delivery(format!("{}: subscriber closed", self.name))
            }
        })
    }
}
