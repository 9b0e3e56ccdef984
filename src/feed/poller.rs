//! Feed poller
//!
//! Fetches the board on a fixed cadence, diffs every game against the state
//! store and publishes the resulting change events to the broadcast hub and
//! the notification engine.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::FeedSource;
use crate::domain::ChangeEvent;
use crate::services::{HealthState, Metrics};
use crate::state::StateStore;

/// Message on the fan-out hub
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Update(Arc<ChangeEvent>),
    /// The cycle's fetch failed; subscribers stay connected
    FetchFailed(String),
}

/// Outcome of a single poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub games_seen: usize,
    pub events_emitted: usize,
    pub fetch_failed: bool,
}

pub struct Poller {
    feed: Arc<dyn FeedSource>,
    store: Arc<StateStore>,
    interval: Duration,
    hub: Option<broadcast::Sender<FeedEvent>>,
    notifications: Option<mpsc::UnboundedSender<Arc<ChangeEvent>>>,
    metrics: Option<Arc<Metrics>>,
    health: Option<Arc<HealthState>>,
}

impl Poller {
    pub fn new(feed: Arc<dyn FeedSource>, store: Arc<StateStore>, interval: Duration) -> Self {
        Self {
            feed,
            store,
            interval,
            hub: None,
            notifications: None,
            metrics: None,
            health: None,
        }
    }

    /// Publish events and fetch failures to the broadcast hub
    pub fn with_broadcast(mut self, hub: broadcast::Sender<FeedEvent>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Forward change events to the notification engine
    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<Arc<ChangeEvent>>) -> Self {
        self.notifications = Some(tx);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Run one fetch/diff/publish cycle.
    ///
    /// A failed fetch leaves the store untouched so subscribers keep seeing
    /// the last known state until the next cycle succeeds.
    pub async fn poll_once(&self) -> CycleReport {
        let games = match self.feed.fetch().await {
            Ok(games) => games,
            Err(e) => {
                if e.is_transient() {
                    warn!("Feed {} fetch failed, retrying next cycle: {}", self.feed.name(), e);
                } else {
                    error!("Feed {} returned unusable data: {}", self.feed.name(), e);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.inc_poll_failures();
                }
                if let Some(health) = &self.health {
                    health.record_poll_failure(e.to_string()).await;
                }
                self.publish_hub(FeedEvent::FetchFailed(e.to_string()));
                return CycleReport {
                    fetch_failed: true,
                    ..CycleReport::default()
                };
            }
        };

        let mut report = CycleReport {
            games_seen: games.len(),
            ..CycleReport::default()
        };

        for current in &games {
            let previous = self.store.get(&current.id).await;
            let event = ChangeEvent::detect(previous.as_ref(), current);

            // Always refresh so unchanged games keep their TTL alive
            self.store.refresh(current).await;

            if let Some(event) = event {
                debug!(
                    "Game {} changed: {:?} ({} {}-{})",
                    event.entity_id,
                    event.changed,
                    event.current.status,
                    event.current.home_score,
                    event.current.away_score
                );
                self.publish(Arc::new(event));
                report.events_emitted += 1;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_polls();
            metrics.add_change_events(report.events_emitted as u64);
        }
        if let Some(health) = &self.health {
            health.record_poll_success().await;
        }

        report
    }

    fn publish(&self, event: Arc<ChangeEvent>) {
        if let Some(tx) = &self.notifications {
            if tx.send(Arc::clone(&event)).is_err() {
                warn!("Notification engine is gone; dropping event for {}", event.entity_id);
            }
        }
        self.publish_hub(FeedEvent::Update(event));
    }

    fn publish_hub(&self, event: FeedEvent) {
        if let Some(hub) = &self.hub {
            // No subscribers is the normal idle state
            let _ = hub.send(event);
        }
    }

    /// Poll until `cancel` fires. The first cycle runs immediately.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Poller started: feed={} interval={:?}",
            self.feed.name(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.poll_once().await;
                    if !report.fetch_failed {
                        debug!(
                            "Poll cycle: {} games, {} events",
                            report.games_seen, report.events_emitted
                        );
                    }
                }
            }
        }

        info!("Poller stopped");
    }
}
