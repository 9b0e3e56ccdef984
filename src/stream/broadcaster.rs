//! Subscriber fan-out
//!
//! One hub fed by the poller, one session task per connection. Each session
//! owns a hub cursor and a bounded output queue, so a slow subscriber only
//! ever delays itself.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{Connected, GameUpdate, StreamMessage};
use crate::config::StreamConfig;
use crate::feed::FeedEvent;
use crate::services::Metrics;

/// A live subscriber connection
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub connection_id: Uuid,
    /// Only events for this game are forwarded when set
    pub filter: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Subscription {
    fn matches(&self, entity_id: &str) -> bool {
        self.filter.as_deref().map_or(true, |game| game == entity_id)
    }
}

pub struct Broadcaster {
    hub: broadcast::Sender<FeedEvent>,
    heartbeat: Duration,
    lifetime: Duration,
    connection_buffer: usize,
    subscriptions: Arc<DashMap<Uuid, Subscription>>,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

impl Broadcaster {
    /// Sessions are cancelled together with `shutdown`
    pub fn new(config: &StreamConfig, shutdown: CancellationToken, metrics: Arc<Metrics>) -> Self {
        let (hub, _) = broadcast::channel(config.hub_capacity.max(1));
        Self {
            hub,
            heartbeat: config.heartbeat_interval(),
            lifetime: config.max_connection_lifetime(),
            connection_buffer: config.connection_buffer.max(1),
            subscriptions: Arc::new(DashMap::new()),
            shutdown,
            metrics,
        }
    }

    /// Hub sender handed to the poller
    pub fn sender(&self) -> broadcast::Sender<FeedEvent> {
        self.hub.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Open a connection. `connected` is the first message on the stream.
    pub fn subscribe(&self, filter: Option<String>) -> SubscriberStream {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(self.lifetime).unwrap_or_else(|_| chrono::Duration::zero());
        let subscription = Subscription {
            connection_id: Uuid::new_v4(),
            filter,
            created_at,
            expires_at,
        };
        let connection_id = subscription.connection_id;

        // Take the hub cursor before spawning so nothing published after
        // this call is missed.
        let hub_rx = self.hub.subscribe();
        let (tx, rx) = mpsc::channel(self.connection_buffer);
        let cancel = self.shutdown.child_token();

        self.subscriptions.insert(connection_id, subscription.clone());
        self.metrics.connection_opened();
        info!(
            "Stream connection {} opened (game filter: {:?}, {} active)",
            connection_id,
            subscription.filter,
            self.subscriptions.len()
        );

        let session = Session {
            subscription,
            tx,
            hub_rx,
            cancel: cancel.clone(),
            heartbeat: self.heartbeat,
            deadline: Instant::now() + self.lifetime,
        };
        let subscriptions = Arc::clone(&self.subscriptions);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let reason = session.run().await;
            subscriptions.remove(&connection_id);
            metrics.connection_closed();
            info!("Stream connection {} closed: {}", connection_id, reason);
        });

        SubscriberStream {
            connection_id,
            rx,
            cancel,
        }
    }
}

struct Session {
    subscription: Subscription,
    tx: mpsc::Sender<StreamMessage>,
    hub_rx: broadcast::Receiver<FeedEvent>,
    cancel: CancellationToken,
    heartbeat: Duration,
    /// End of the connection's lifetime
    deadline: Instant,
}

impl Session {
    /// Drive one connection until it ends, returning why it ended
    async fn run(mut self) -> &'static str {
        let connected = StreamMessage::Connected(Connected {
            connection_id: self.subscription.connection_id,
            game: self.subscription.filter.clone(),
            expires_at: self.subscription.expires_at,
            timestamp: Utc::now(),
        });
        if let Err(reason) = self.deliver(connected).await {
            return reason;
        }

        let expiry = tokio::time::sleep_until(self.deadline);
        tokio::pin!(expiry);
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return "cancelled",
                _ = self.tx.closed() => return "subscriber gone",
                _ = &mut expiry => return self.expire(),
                _ = heartbeat.tick() => {
                    if let Err(reason) = self.deliver(StreamMessage::heartbeat()).await {
                        return reason;
                    }
                }
                received = self.hub_rx.recv() => {
                    let message = match received {
                        Ok(FeedEvent::Update(event)) => {
                            if !self.subscription.matches(&event.entity_id) {
                                continue;
                            }
                            StreamMessage::GameUpdate(GameUpdate::from(event.as_ref()))
                        }
                        Ok(FeedEvent::FetchFailed(reason)) => {
                            StreamMessage::error(format!("upstream feed unavailable: {}", reason))
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                "Stream connection {} lagged, skipped {} events",
                                self.subscription.connection_id, skipped
                            );
                            continue;
                        }
                        Err(RecvError::Closed) => return "hub closed",
                    };
                    if let Err(reason) = self.deliver(message).await {
                        return reason;
                    }
                }
            }
        }
    }

    /// Queue a message for the subscriber. A full queue waits, but never past
    /// cancellation or the connection's deadline.
    async fn deliver(&self, message: StreamMessage) -> Result<(), &'static str> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err("cancelled"),
            _ = tokio::time::sleep_until(self.deadline) => Err(self.expire()),
            sent = self.tx.send(message) => sent.map_err(|_| {
                debug!("Stream connection {} receiver dropped", self.subscription.connection_id);
                "subscriber gone"
            }),
        }
    }

    /// Offer the `reconnect` directive without waiting for queue space
    fn expire(&self) -> &'static str {
        let directive = StreamMessage::reconnect("max connection lifetime reached");
        if self.tx.try_send(directive).is_err() {
            debug!(
                "Stream connection {} queue full at expiry, closing without reconnect",
                self.subscription.connection_id
            );
        }
        "lifetime expired"
    }
}

/// Receiving end of one connection.
///
/// Dropping it cancels the session, which stops that connection's
/// heartbeat and forwarding.
pub struct SubscriberStream {
    connection_id: Uuid,
    rx: mpsc::Receiver<StreamMessage>,
    cancel: CancellationToken,
}

impl SubscriberStream {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub async fn recv(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }
}

impl Stream for SubscriberStream {
    type Item = StreamMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::fixtures::snapshot;
    use crate::domain::{ChangeEvent, GameStatus};

    fn config() -> StreamConfig {
        StreamConfig {
            heartbeat_interval_secs: 30,
            max_connection_lifetime_secs: 300,
            hub_capacity: 16,
            connection_buffer: 8,
        }
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(&config(), CancellationToken::new(), Arc::new(Metrics::new()))
    }

    fn update(id: &str, home: u32) -> FeedEvent {
        let previous = snapshot(id, GameStatus::Live, 0, 0, 1);
        let current = snapshot(id, GameStatus::Live, home, 0, 1);
        FeedEvent::Update(Arc::new(ChangeEvent::detect(Some(&previous), &current).unwrap()))
    }

    #[tokio::test]
    async fn test_connected_is_first_event() {
        let b = broadcaster();
        let mut stream = b.subscribe(None);
        match stream.recv().await.unwrap() {
            StreamMessage::Connected(c) => assert_eq!(c.connection_id, stream.connection_id()),
            other => panic!("expected connected, got {:?}", other),
        }
        assert_eq!(b.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_filter_applies_per_connection() {
        let b = broadcaster();
        let mut all = b.subscribe(None);
        let mut g2 = b.subscribe(Some("G2".to_string()));
        all.recv().await.unwrap();
        g2.recv().await.unwrap();

        let hub = b.sender();
        hub.send(update("G1", 2)).unwrap();
        hub.send(update("G2", 3)).unwrap();

        let first = all.recv().await.unwrap();
        assert!(matches!(first, StreamMessage::GameUpdate(ref u) if u.id == "G1"));
        let second = all.recv().await.unwrap();
        assert!(matches!(second, StreamMessage::GameUpdate(ref u) if u.id == "G2"));

        let only = g2.recv().await.unwrap();
        assert!(matches!(only, StreamMessage::GameUpdate(ref u) if u.id == "G2"));
    }

    #[tokio::test]
    async fn test_fetch_failure_becomes_error_event() {
        let b = broadcaster();
        let mut stream = b.subscribe(None);
        stream.recv().await.unwrap();

        b.sender().send(FeedEvent::FetchFailed("HTTP 503".into())).unwrap();
        assert_eq!(stream.recv().await.unwrap().event_name(), "error");

        // The connection stays open
        b.sender().send(update("G1", 2)).unwrap();
        assert_eq!(stream.recv().await.unwrap().event_name(), "gameUpdate");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_then_reconnect_at_lifetime() {
        let b = broadcaster();
        let mut stream = b.subscribe(None);
        assert_eq!(stream.recv().await.unwrap().event_name(), "connected");

        let mut heartbeats = 0;
        loop {
            match stream.recv().await {
                Some(StreamMessage::Heartbeat(_)) => heartbeats += 1,
                Some(StreamMessage::Reconnect(_)) => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        // Heartbeats at 30s..270s; the 300s tick loses to expiry
        assert_eq!(heartbeats, 9);
        assert!(stream.recv().await.is_none());

        tokio::task::yield_now().await;
        assert_eq!(b.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_closed_at_lifetime() {
        let metrics = Arc::new(Metrics::new());
        let b = Broadcaster::new(&config(), CancellationToken::new(), metrics.clone());
        // Never read; the queue holds 8 messages
        let _stalled = b.subscribe(None);

        let hub = b.sender();
        for i in 0..20 {
            hub.send(update("G1", i + 1)).unwrap();
            tokio::task::yield_now().await;
        }
        assert_eq!(b.connection_count(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(b.connection_count(), 0);
        assert_eq!(metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_drop_deregisters_connection() {
        let b = broadcaster();
        let stream = b.subscribe(None);
        assert_eq!(b.connection_count(), 1);
        drop(stream);

        for _ in 0..50 {
            if b.connection_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(b.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let b = broadcaster();
        // Never read from `slow`; its queue holds 8 messages
        let _slow = b.subscribe(None);
        let mut fast = b.subscribe(None);
        fast.recv().await.unwrap();

        let hub = b.sender();
        for i in 0..12 {
            hub.send(update("G1", i + 1)).unwrap();
            let got = fast.recv().await.unwrap();
            assert!(matches!(got, StreamMessage::GameUpdate(ref u) if u.home_score == i + 1));
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_connection() {
        let shutdown = CancellationToken::new();
        let b = Broadcaster::new(&config(), shutdown.clone(), Arc::new(Metrics::new()));
        let mut a = b.subscribe(None);
        let mut c = b.subscribe(None);
        a.recv().await.unwrap();
        c.recv().await.unwrap();

        shutdown.cancel();
        assert!(a.recv().await.is_none());
        assert!(c.recv().await.is_none());
    }
}
