use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Metrics collector for observability
#[derive(Debug, Default)]
pub struct Metrics {
    /// Poll cycles that fetched the feed successfully
    pub polls: AtomicU64,
    /// Poll cycles whose fetch failed
    pub poll_failures: AtomicU64,
    /// Change events published
    pub change_events: AtomicU64,
    /// Notifications delivered to sinks
    pub notifications: AtomicU64,
    /// Calls made to the insight backend
    pub insight_calls: AtomicU64,
    /// Backend calls answered with 429
    pub insight_throttled: AtomicU64,
    /// Enqueues resolved immediately as duplicates
    pub insight_deduped: AtomicU64,
    /// Backend calls that failed for any other reason
    pub insight_failed: AtomicU64,
    /// Currently open subscriber connections
    pub active_connections: AtomicU64,
    /// Reconnects performed by the stream client
    pub client_reconnects: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_polls(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_poll_failures(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_change_events(&self, n: u64) {
        self.change_events.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_notifications(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insight_calls(&self) {
        self.insight_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insight_throttled(&self) {
        self.insight_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insight_deduped(&self) {
        self.insight_deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insight_failed(&self) {
        self.insight_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate instead of wrapping if open/close ever get out of step
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn inc_client_reconnects(&self) {
        self.client_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get current metrics as a formatted string
    pub fn summary(&self) -> String {
        format!(
            "polls={} failures={} events={} notifications={} insights={}/{} throttled, {} deduped, {} failed connections={}",
            self.polls.load(Ordering::Relaxed),
            self.poll_failures.load(Ordering::Relaxed),
            self.change_events.load(Ordering::Relaxed),
            self.notifications.load(Ordering::Relaxed),
            self.insight_calls.load(Ordering::Relaxed),
            self.insight_throttled.load(Ordering::Relaxed),
            self.insight_deduped.load(Ordering::Relaxed),
            self.insight_failed.load(Ordering::Relaxed),
            self.active_connections.load(Ordering::Relaxed),
        )
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        format!(
            r#"# HELP scorecast_polls_total Successful feed polls
# TYPE scorecast_polls_total counter
scorecast_polls_total {}

# HELP scorecast_poll_failures_total Failed feed polls
# TYPE scorecast_poll_failures_total counter
scorecast_poll_failures_total {}

# HELP scorecast_change_events_total Change events published
# TYPE scorecast_change_events_total counter
scorecast_change_events_total {}

# HELP scorecast_notifications_total Notifications delivered
# TYPE scorecast_notifications_total counter
scorecast_notifications_total {}

# HELP scorecast_insight_calls_total Insight backend calls
# TYPE scorecast_insight_calls_total counter
scorecast_insight_calls_total {}

# HELP scorecast_insight_throttled_total Insight calls answered with 429
# TYPE scorecast_insight_throttled_total counter
scorecast_insight_throttled_total {}

# HELP scorecast_insight_deduped_total Insight requests resolved as duplicates
# TYPE scorecast_insight_deduped_total counter
scorecast_insight_deduped_total {}

# HELP scorecast_insight_failed_total Insight calls that failed
# TYPE scorecast_insight_failed_total counter
scorecast_insight_failed_total {}

# HELP scorecast_active_connections Open stream connections
# TYPE scorecast_active_connections gauge
scorecast_active_connections {}

# HELP scorecast_client_reconnects_total Stream client reconnects
# TYPE scorecast_client_reconnects_total counter
scorecast_client_reconnects_total {}
"#,
            self.polls.load(Ordering::Relaxed),
            self.poll_failures.load(Ordering::Relaxed),
            self.change_events.load(Ordering::Relaxed),
            self.notifications.load(Ordering::Relaxed),
            self.insight_calls.load(Ordering::Relaxed),
            self.insight_throttled.load(Ordering::Relaxed),
            self.insight_deduped.load(Ordering::Relaxed),
            self.insight_failed.load(Ordering::Relaxed),
            self.active_connections.load(Ordering::Relaxed),
            self.client_reconnects.load(Ordering::Relaxed),
        )
    }

    /// Log periodic status
    pub fn log_status(&self) {
        info!("{}", self.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge_never_wraps() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_closed();
        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 0);
    }

    #[test]
    fn test_prometheus_render() {
        let metrics = Metrics::new();
        metrics.inc_polls();
        metrics.add_change_events(3);
        let text = metrics.prometheus();
        assert!(text.contains("scorecast_polls_total 1"));
        assert!(text.contains("scorecast_change_events_total 3"));
        assert!(text.contains("# TYPE scorecast_active_connections gauge"));
    }
}
