//! Stage outcome notifications.
//!
//! The orchestrator builds one [`NotificationEvent`] per stage that reaches a
//! terminal status and hands it to the [`NotificationRouter`], which fans it
//! out once to every registered [`Recipient`]. Delivery failures are logged
//! and never affect the run.

pub mod event;
pub mod recipient;
pub mod router;
pub mod webhook;

pub use event::{NotificationEvent, Outcome};
pub use recipient::{ChannelRecipient, LogRecipient, Recipient};
pub use router::{DispatchReport, NotificationRouter, DEFAULT_DELIVERY_TIMEOUT};
pub use webhook::{WebhookRecipient, DEFAULT_WEBHOOK_TIMEOUT};
