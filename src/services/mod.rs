pub mod health;
pub mod metrics;

pub use health::{health_routes, ComponentHealth, HealthResponse, HealthState, HealthStatus};
pub use metrics::Metrics;
