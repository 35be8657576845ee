//! Fan-out of notification events to recipients.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use super::event::NotificationEvent;
use super::recipient::Recipient;
use crate::domain::error::ConveyorError;
use crate::obs;

/// Upper bound on a single recipient's delivery.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// False when the stage is not monitored and nothing was sent.
    pub dispatched: bool,
    pub delivered: usize,
    pub failed: usize,
}

/// Routes stage outcome events to every registered recipient.
///
/// Each delivery is bounded by a timeout; a recipient that does not finish
/// in time counts as failed.
#[derive(Clone)]
pub struct NotificationRouter {
    recipients: Vec<Arc<dyn Recipient>>,
    /// `None` monitors every stage.
    monitored: Option<BTreeSet<String>>,
    delivery_timeout: Duration,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            monitored: None,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn with_recipient(mut self, recipient: Arc<dyn Recipient>) -> Self {
        self.recipients.push(recipient);
        self
    }

    /// Restrict dispatch to the named stages.
    pub fn with_monitored<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.monitored = Some(stages.into_iter().map(Into::into).collect());
        self
    }

    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_monitored(&self, stage: &str) -> bool {
        self.monitored
            .as_ref()
            .map(|set| set.contains(stage))
            .unwrap_or(true)
    }

    /// Deliver `event` once to every recipient, concurrently.
    pub async fn notify(&self, event: &NotificationEvent) -> DispatchReport {
        if !self.is_monitored(&event.stage) {
            debug!(stage = %event.stage, "stage not monitored, skipping notification");
            return DispatchReport::default();
        }

        let limit = self.delivery_timeout;
        let results = join_all(self.recipients.iter().map(|r| async move {
            let result = match tokio::time::timeout(limit, r.deliver(event)).await {
                Ok(result) => result,
                Err(_) => Err(ConveyorError::Delivery(format!(
                    "no response within {}ms",
                    limit.as_millis()
                ))),
            };
            (r.name().to_string(), result)
        }))
        .await;

        let mut report = DispatchReport {
            dispatched: true,
            ..DispatchReport::default()
        };
        for (name, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    obs::emit_notification_failed(&event.run_id.0, &event.stage, &name, &e);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{ConveyorError, Result};
    use crate::notify::recipient::ChannelRecipient;
    use async_trait::async_trait;
    use conveyor_state::RunId;

    struct Broken;

    #[async_trait]
    impl Recipient for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn deliver(&self, _event: &NotificationEvent) -> Result<()> {
            Err(ConveyorError::Delivery("sms gateway down".to_string()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Recipient for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn deliver(&self, _event: &NotificationEvent) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_recipient_times_out() {
        let (ok, mut rx) = ChannelRecipient::channel("ok", 4);
        let router = NotificationRouter::new()
            .with_recipient(Arc::new(Hanging))
            .with_recipient(Arc::new(ok))
            .with_delivery_timeout(Duration::from_secs(2));

        let ev = NotificationEvent::succeeded(&RunId::new(), "deploy");
        let report = router.notify(&ev).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(rx.recv().await.unwrap(), ev);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_recipient_once() {
        let (a, mut rx_a) = ChannelRecipient::channel("a", 4);
        let (b, mut rx_b) = ChannelRecipient::channel("b", 4);
        let router = NotificationRouter::new()
            .with_recipient(Arc::new(a))
            .with_recipient(Arc::new(b));

        let ev = NotificationEvent::succeeded(&RunId::new(), "test");
        let report = router.notify(&ev).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), ev);
        assert_eq!(rx_b.recv().await.unwrap(), ev);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_others() {
        let (ok, mut rx) = ChannelRecipient::channel("ok", 4);
        let router = NotificationRouter::new()
            .with_recipient(Arc::new(Broken))
            .with_recipient(Arc::new(ok));

        let ev = NotificationEvent::failed(&RunId::new(), "build", "exit 1");
        let report = router.notify(&ev).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(rx.recv().await.unwrap().stage, "build");
    }

    #[tokio::test]
    async fn test_unmonitored_stage_is_not_dispatched() {
        let (r, mut rx) = ChannelRecipient::channel("r", 4);
        let router = NotificationRouter::new()
            .with_recipient(Arc::new(r))
            .with_monitored(["build", "deploy"]);

        let report = router
            .notify(&NotificationEvent::succeeded(&RunId::new(), "lint"))
            .await;
        assert!(!report.dispatched);
        assert!(rx.try_recv().is_err());
        assert!(router.is_monitored("deploy"));
    }
}
