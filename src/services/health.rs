//! Health and metrics endpoints
//!
//! Liveness and readiness checks for process supervision plus the
//! Prometheus scrape endpoint.

use crate::services::Metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub active_connections: u64,
}

/// Shared state for the health endpoints
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    /// Last poll that fetched the feed successfully
    last_poll: RwLock<Option<DateTime<Utc>>>,
    /// Last poll error, cleared by the next success
    last_poll_error: RwLock<Option<String>>,
    /// Feed is degraded once the last success is older than this
    poll_staleness: Duration,
    pub metrics: Arc<Metrics>,
}

impl HealthState {
    /// `poll_interval` sets the staleness threshold at three missed cycles
    pub fn new(metrics: Arc<Metrics>, poll_interval: Duration) -> Self {
        Self {
            started_at: Utc::now(),
            last_poll: RwLock::new(None),
            last_poll_error: RwLock::new(None),
            poll_staleness: poll_interval * 3,
            metrics,
        }
    }

    pub async fn record_poll_success(&self) {
        *self.last_poll.write().await = Some(Utc::now());
        *self.last_poll_error.write().await = None;
    }

    pub async fn record_poll_failure(&self, error: impl Into<String>) {
        *self.last_poll_error.write().await = Some(error.into());
    }

    /// True once any poll has completed, successful or not
    pub async fn has_polled(&self) -> bool {
        self.last_poll.read().await.is_some() || self.last_poll_error.read().await.is_some()
    }

    /// Check if the feed has gone quiet
    pub async fn is_feed_stale(&self) -> bool {
        match *self.last_poll.read().await {
            Some(last) => {
                let elapsed = (Utc::now() - last).to_std().unwrap_or_default();
                elapsed > self.poll_staleness
            }
            None => true,
        }
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let last_poll = *self.last_poll.read().await;
        let last_error = self.last_poll_error.read().await.clone();

        // A stale feed still serves cached state and heartbeats, so the
        // process stays ready.
        let feed_status = if last_poll.is_none() && last_error.is_none() {
            HealthStatus::Degraded
        } else if self.is_feed_stale().await {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let components = vec![ComponentHealth {
            name: "feed".to_string(),
            status: feed_status,
            message: match (&last_error, feed_status) {
                (Some(err), _) => Some(err.clone()),
                (None, HealthStatus::Degraded) => Some("No recent successful poll".to_string()),
                _ => None,
            },
            last_check: last_poll,
        }];

        let uptime = (Utc::now() - self.started_at).num_seconds().max(0) as u64;

        HealthResponse {
            status: feed_status,
            timestamp: Utc::now(),
            uptime_seconds: uptime,
            components,
            active_connections: self.metrics.active_connections(),
        }
    }
}

/// Health routes, merged into the main router
pub fn health_routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    // Degraded still answers 200
    (StatusCode::OK, Json(health))
}

/// Liveness check
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Ready once the first poll has completed. A later stale feed keeps
/// serving cached state, so it does not flip readiness back.
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.has_polled().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let up = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
    };

    let body = format!(
        r#"# HELP scorecast_up Health status (1=healthy, 0=degraded)
# TYPE scorecast_up gauge
scorecast_up {}

# HELP scorecast_uptime_seconds Uptime in seconds
# TYPE scorecast_uptime_seconds counter
scorecast_uptime_seconds {}

{}"#,
        up,
        health.uptime_seconds,
        state.metrics.prometheus(),
    );

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        body,
    )
}
