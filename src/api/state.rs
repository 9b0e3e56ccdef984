use std::sync::Arc;

use crate::insight::InsightQueue;
use crate::services::HealthState;
use crate::stream::Broadcaster;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Fan-out for stream connections
    pub broadcaster: Arc<Broadcaster>,

    /// Producer handle of the insight queue
    pub insights: InsightQueue,

    pub health: Arc<HealthState>,
}

impl AppState {
    pub fn new(broadcaster: Arc<Broadcaster>, insights: InsightQueue, health: Arc<HealthState>) -> Self {
        Self {
            broadcaster,
            insights,
            health,
        }
    }
}
