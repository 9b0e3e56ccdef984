//! Per-game notification state machine
//!
//! Consumes change events and raises at most one notification per game and
//! transition. Halftime and final notifications wait (bounded) for a queued
//! insight; close-game alerts go out immediately.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::ledger::NotificationLedger;
use super::sink::Dispatcher;
use crate::config::NotificationConfig;
use crate::domain::{
    ChangeEvent, GameSnapshot, GameStatus, InsightRequest, Notification, NotificationRecord,
    TransitionType,
};
use crate::insight::InsightQueue;
use crate::services::Metrics;

/// Trackers of finished games are dropped after this long
const FINISHED_RETENTION: Duration = Duration::from_secs(6 * 60 * 60);

/// What the engine knows about one game
#[derive(Debug)]
struct GameTracker {
    status: GameStatus,
    /// Transitions already handled, fired or suppressed at startup
    handled: HashSet<TransitionType>,
    /// When the game was first seen in a terminal status
    finished_at: Option<Instant>,
}

pub struct NotificationEngine {
    config: NotificationConfig,
    games: HashMap<String, GameTracker>,
    ledger: Arc<NotificationLedger>,
    insights: InsightQueue,
    dispatcher: Dispatcher,
    deliveries: TaskTracker,
    metrics: Arc<Metrics>,
}

impl NotificationEngine {
    pub fn new(
        config: NotificationConfig,
        insights: InsightQueue,
        dispatcher: Dispatcher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            games: HashMap::new(),
            ledger: Arc::new(NotificationLedger::new()),
            insights,
            dispatcher,
            deliveries: TaskTracker::new(),
            metrics,
        }
    }

    pub fn ledger(&self) -> Arc<NotificationLedger> {
        Arc::clone(&self.ledger)
    }

    /// Number of games with a live tracker
    pub fn tracked_games(&self) -> usize {
        self.games.len()
    }

    /// Apply one change event, returning the records it created
    pub fn handle_event(&mut self, event: &ChangeEvent) -> Vec<NotificationRecord> {
        self.evict_finished();

        let current = &event.current;
        let mut fired = Vec::new();

        if let Some(transition) = self.observe_status(event) {
            if let Some(record) = self.fire_transition(current, transition) {
                fired.push(record);
            }
        }

        if let Some(record) = self.check_close_game(current) {
            fired.push(record);
        }

        fired
    }

    /// Update the game's status, returning a transition to notify
    fn observe_status(&mut self, event: &ChangeEvent) -> Option<TransitionType> {
        let current = &event.current;
        let tracker = self.games.entry(current.id.clone()).or_insert_with(|| {
            // First sight since startup: whatever the game had already
            // reached before this event was notified before we were running.
            let baseline = event.previous.status;
            let mut handled = HashSet::new();
            if let Some(transition) = TransitionType::for_status(baseline) {
                debug!(
                    "Game {} first observed at {}, suppressing {}",
                    current.id, baseline, transition
                );
                handled.insert(transition);
            }
            GameTracker {
                status: baseline,
                handled,
                finished_at: baseline.is_terminal().then(Instant::now),
            }
        });

        if tracker.status == current.status {
            return None;
        }
        if !tracker.status.can_transition_to(current.status) {
            warn!(
                "Game {} reported backward status {} -> {}, ignoring",
                current.id, tracker.status, current.status
            );
            return None;
        }

        debug!(
            "Game {} transitioned {} -> {}",
            current.id, tracker.status, current.status
        );
        tracker.status = current.status;
        if current.status.is_terminal() && tracker.finished_at.is_none() {
            tracker.finished_at = Some(Instant::now());
        }

        let transition = TransitionType::for_status(current.status)?;
        if tracker.handled.insert(transition) {
            Some(transition)
        } else {
            None
        }
    }

    /// Forget games that finished long ago. A late event for one of them
    /// starts from a terminal baseline and the ledger still holds its
    /// records, so nothing fires twice.
    fn evict_finished(&mut self) {
        let now = Instant::now();
        let before = self.games.len();
        self.games.retain(|_, tracker| {
            tracker
                .finished_at
                .map_or(true, |at| now.duration_since(at) < FINISHED_RETENTION)
        });
        let evicted = before - self.games.len();
        if evicted > 0 {
            debug!("Dropped {} finished game trackers", evicted);
        }
    }

    fn fire_transition(
        &mut self,
        snapshot: &GameSnapshot,
        transition: TransitionType,
    ) -> Option<NotificationRecord> {
        let record = NotificationRecord::new(snapshot.id.clone(), transition, true);
        if !self.ledger.try_insert(record.clone()) {
            return None;
        }

        info!("Game {}: {} notification raised", snapshot.id, transition);
        let ticket = self
            .insights
            .enqueue(InsightRequest::for_snapshot(snapshot, transition));

        let wait = self.config.insight_wait();
        let dispatcher = self.dispatcher.clone();
        let metrics = Arc::clone(&self.metrics);
        let notification_record = record.clone();
        let snapshot = snapshot.clone();
        self.deliveries.spawn(async move {
            let key = ticket.key().to_string();
            let insight = match tokio::time::timeout(wait, ticket.resolve()).await {
                Ok(outcome) => {
                    debug!("Insight {} resolved: {}", key, outcome.as_str());
                    outcome.into_insight()
                }
                Err(_) => {
                    warn!("Insight {} not ready after {:?}; notifying without it", key, wait);
                    None
                }
            };
            let notification = Notification {
                record: notification_record,
                snapshot,
                insight,
            };
            dispatcher.dispatch(&notification).await;
            metrics.inc_notifications();
        });

        Some(record)
    }

    fn check_close_game(&mut self, snapshot: &GameSnapshot) -> Option<NotificationRecord> {
        // Judge by the tracked status so a stale Live after Final is ignored
        let status = self
            .games
            .get(&snapshot.id)
            .map_or(snapshot.status, |tracker| tracker.status);
        if status != GameStatus::Live
            || snapshot.period < self.config.final_period
            || snapshot.margin() > self.config.close_game_margin
        {
            return None;
        }

        let record = NotificationRecord::new(snapshot.id.clone(), TransitionType::CloseGame, false);
        if !self.ledger.try_insert(record.clone()) {
            return None;
        }
        if let Some(tracker) = self.games.get_mut(&snapshot.id) {
            tracker.handled.insert(TransitionType::CloseGame);
        }

        info!(
            "Game {}: close game in Q{} (margin {})",
            snapshot.id,
            snapshot.period,
            snapshot.margin()
        );
        let notification = Notification {
            record: record.clone(),
            snapshot: snapshot.clone(),
            insight: None,
        };
        let dispatcher = self.dispatcher.clone();
        let metrics = Arc::clone(&self.metrics);
        self.deliveries.spawn(async move {
            dispatcher.dispatch(&notification).await;
            metrics.inc_notifications();
        });

        Some(record)
    }

    /// Wait for every in-progress delivery to finish
    pub async fn flush(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    /// Consume events until the channel closes or `cancel` fires, then let
    /// pending deliveries finish.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Arc<ChangeEvent>>, cancel: CancellationToken) {
        info!("Notification engine started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => break,
                },
            }
        }

        self.flush().await;
        info!(
            "Notification engine stopped ({} records)",
            self.ledger.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InsightConfig;
    use crate::domain::game::fixtures::snapshot;
    use crate::domain::Insight;
    use crate::error::InsightError;
    use crate::insight::{DisabledInsights, InsightBackend, MockInsightBackend};
    use crate::notify::ChannelSink;
    use std::time::Duration;

    fn event(previous: &GameSnapshot, current: &GameSnapshot) -> ChangeEvent {
        ChangeEvent::detect(Some(previous), current).expect("snapshots differ")
    }

    fn engine_with(
        backend: Arc<dyn InsightBackend>,
    ) -> (
        NotificationEngine,
        InsightQueue,
        mpsc::UnboundedReceiver<Notification>,
        CancellationToken,
    ) {
        let metrics = Arc::new(Metrics::new());
        let insight_config = InsightConfig {
            min_interval_ms: 0,
            ..InsightConfig::default()
        };
        let (queue, worker) = InsightQueue::new(&insight_config, backend, metrics.clone());
        let cancel = CancellationToken::new();
        tokio::spawn(worker.run(cancel.clone()));

        let (sink, rx) = ChannelSink::new();
        let engine = NotificationEngine::new(
            NotificationConfig::default(),
            queue.clone(),
            Dispatcher::new().with_sink(Arc::new(sink)),
            metrics,
        );
        (engine, queue, rx, cancel)
    }

    #[tokio::test]
    async fn test_halftime_fires_once_with_insight() {
        let mut backend = MockInsightBackend::new();
        backend.expect_generate().times(1).returning(|_| {
            Ok(Insight {
                summary: "Boston leads by three.".into(),
                model: "m".into(),
            })
        });
        let (mut engine, _queue, mut rx, _cancel) = engine_with(Arc::new(backend));

        let scheduled = snapshot("G1", GameStatus::Scheduled, 0, 0, 0);
        let live = snapshot("G1", GameStatus::Live, 10, 8, 1);
        let half = snapshot("G1", GameStatus::Halftime, 55, 52, 2);

        assert!(engine.handle_event(&event(&scheduled, &live)).is_empty());
        let fired = engine.handle_event(&event(&live, &half));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].transition, TransitionType::EnteredHalftime);
        assert!(fired[0].insight_requested);

        let mut half_clock = half.clone();
        half_clock.clock = "0:00".into();
        assert!(engine.handle_event(&event(&half, &half_clock)).is_empty());

        engine.flush().await;
        let notification = rx.recv().await.unwrap();
        assert_eq!(
            notification.insight.map(|i| i.summary).as_deref(),
            Some("Boston leads by three.")
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_first_event_into_halftime_fires() {
        let (mut engine, _queue, _rx, _cancel) = engine_with(Arc::new(DisabledInsights));

        // Poller saw the game Live before the engine got any event for it
        let live = snapshot("G4", GameStatus::Live, 50, 48, 2);
        let half = snapshot("G4", GameStatus::Halftime, 55, 52, 2);

        let fired = engine.handle_event(&event(&live, &half));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].transition, TransitionType::EnteredHalftime);
    }

    #[tokio::test]
    async fn test_lazy_start_suppresses_final() {
        let (mut engine, _queue, mut rx, _cancel) = engine_with(Arc::new(DisabledInsights));

        // Engine comes up after the game already ended
        let final_a = snapshot("G1", GameStatus::Final, 101, 98, 4);
        let mut final_b = final_a.clone();
        final_b.clock = "0.0".into();

        assert!(engine.handle_event(&event(&final_a, &final_b)).is_empty());
        assert!(engine.handle_event(&event(&final_b, &final_a)).is_empty());
        assert!(engine.ledger().is_empty());

        engine.flush().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_game_fires_once() {
        let (mut engine, _queue, mut rx, _cancel) = engine_with(Arc::new(DisabledInsights));

        let q4_a = snapshot("G2", GameStatus::Live, 98, 97, 4);
        let q4_b = snapshot("G2", GameStatus::Live, 100, 97, 4);
        let q4_c = snapshot("G2", GameStatus::Live, 101, 97, 4);

        let fired = engine.handle_event(&event(&q4_a, &q4_b));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].transition, TransitionType::CloseGame);
        assert!(!fired[0].insight_requested);
        assert!(engine.handle_event(&event(&q4_b, &q4_c)).is_empty());

        engine.flush().await;
        assert_eq!(
            rx.recv().await.unwrap().record.transition,
            TransitionType::CloseGame
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_game_needs_final_period_and_margin() {
        let (mut engine, _queue, _rx, _cancel) = engine_with(Arc::new(DisabledInsights));

        let q3_a = snapshot("G3", GameStatus::Live, 70, 68, 3);
        let q3_b = snapshot("G3", GameStatus::Live, 72, 68, 3);
        assert!(engine.handle_event(&event(&q3_a, &q3_b)).is_empty());

        let q4_wide = snapshot("G3", GameStatus::Live, 90, 80, 4);
        assert!(engine.handle_event(&event(&q3_b, &q4_wide)).is_empty());
    }

    #[tokio::test]
    async fn test_backward_status_is_ignored() {
        let (mut engine, _queue, _rx, _cancel) = engine_with(Arc::new(DisabledInsights));

        let live = snapshot("G1", GameStatus::Live, 80, 70, 3);
        let final_ = snapshot("G1", GameStatus::Final, 101, 99, 4);
        let mut live_again = snapshot("G1", GameStatus::Live, 101, 99, 4);
        live_again.clock = "0:01".into();
        let mut prior = live.clone();
        prior.clock = "5:00".into();

        engine.handle_event(&event(&prior, &live));
        let fired = engine.handle_event(&event(&live, &final_));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].transition, TransitionType::EnteredFinal);

        // A stale Live after Final neither regresses nor raises a close game
        assert!(engine.handle_event(&event(&final_, &live_again)).is_empty());
        assert_eq!(engine.ledger().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_game_tracker_evicted() {
        let (mut engine, _queue, _rx, _cancel) = engine_with(Arc::new(DisabledInsights));

        let live = snapshot("G1", GameStatus::Live, 99, 90, 4);
        let final_ = snapshot("G1", GameStatus::Final, 101, 90, 4);
        let mut prior = live.clone();
        prior.clock = "1:00".into();
        engine.handle_event(&event(&prior, &live));
        assert_eq!(engine.handle_event(&event(&live, &final_)).len(), 1);

        // Still tracked within the retention window
        let scheduled = snapshot("G2", GameStatus::Scheduled, 0, 0, 0);
        let tipoff = snapshot("G2", GameStatus::Live, 2, 0, 1);
        engine.handle_event(&event(&scheduled, &tipoff));
        assert_eq!(engine.tracked_games(), 2);

        tokio::time::advance(FINISHED_RETENTION + Duration::from_secs(1)).await;
        let mut tipoff_b = tipoff.clone();
        tipoff_b.home_score = 4;
        engine.handle_event(&event(&tipoff, &tipoff_b));
        assert_eq!(engine.tracked_games(), 1);

        // A late correction to the finished game does not fire again
        let mut corrected = final_.clone();
        corrected.away_score = 91;
        assert!(engine.handle_event(&event(&final_, &corrected)).is_empty());
        assert_eq!(engine.ledger().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_sent_without_insight_after_wait() {
        struct Stalled;
        #[async_trait::async_trait]
        impl InsightBackend for Stalled {
            async fn generate(
                &self,
                _request: &InsightRequest,
            ) -> std::result::Result<Insight, InsightError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InsightError::Request("never".into()))
            }
        }

        let (mut engine, _queue, mut rx, _cancel) = engine_with(Arc::new(Stalled));
        let live = snapshot("G1", GameStatus::Live, 99, 90, 4);
        let final_ = snapshot("G1", GameStatus::Final, 101, 90, 4);
        let mut prior = live.clone();
        prior.clock = "1:00".into();
        engine.handle_event(&event(&prior, &live));
        engine.handle_event(&event(&live, &final_));

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.record.transition, TransitionType::EnteredFinal);
        assert!(notification.insight.is_none());
    }
}
