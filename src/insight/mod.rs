pub mod backend;
pub mod queue;

pub use backend::{DisabledInsights, HttpInsightClient, InsightBackend};
#[cfg(test)]
pub use backend::MockInsightBackend;
pub use queue::{InsightOutcome, InsightQueue, InsightTicket, InsightWorker};
