pub mod engine;
pub mod ledger;
pub mod sink;

pub use engine::NotificationEngine;
pub use ledger::NotificationLedger;
pub use sink::{ChannelSink, Dispatcher, LogSink, NotificationSink, WebhookSink};
