//! Single-consumer insight request queue
//!
//! Producers enqueue freely; one worker drains the FIFO, keeping at least
//! `min_interval` between the end of one backend call and the start of the
//! next. A key that is already queued or in flight is never queued twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::InsightBackend;
use crate::config::InsightConfig;
use crate::domain::{Insight, InsightKey, InsightRequest};
use crate::error::InsightError;
use crate::services::Metrics;

/// How a queued request was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum InsightOutcome {
    Generated(Insight),
    /// Same key already queued or in flight
    Deduplicated,
    /// Backend answered 429; the request was dropped after waiting
    Throttled,
    Failed(String),
    /// Queue stopped or no backend configured
    Unavailable,
}

impl InsightOutcome {
    pub fn into_insight(self) -> Option<Insight> {
        match self {
            InsightOutcome::Generated(insight) => Some(insight),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightOutcome::Generated(_) => "generated",
            InsightOutcome::Deduplicated => "deduplicated",
            InsightOutcome::Throttled => "throttled",
            InsightOutcome::Failed(_) => "failed",
            InsightOutcome::Unavailable => "unavailable",
        }
    }
}

struct QueuedInsight {
    key: InsightKey,
    request: InsightRequest,
    enqueued_at: Instant,
    resolver: oneshot::Sender<InsightOutcome>,
}

/// Handle to a queued request
pub struct InsightTicket {
    key: InsightKey,
    rx: oneshot::Receiver<InsightOutcome>,
}

impl InsightTicket {
    pub fn key(&self) -> &InsightKey {
        &self.key
    }

    /// Wait for the worker to resolve the request
    pub async fn resolve(self) -> InsightOutcome {
        self.rx.await.unwrap_or(InsightOutcome::Unavailable)
    }
}

/// Producer side; cheap to clone
#[derive(Clone)]
pub struct InsightQueue {
    tx: mpsc::UnboundedSender<QueuedInsight>,
    pending: Arc<Mutex<HashSet<InsightKey>>>,
    metrics: Arc<Metrics>,
}

impl InsightQueue {
    /// Create the queue and its worker. The worker does nothing until `run`.
    pub fn new(
        config: &InsightConfig,
        backend: Arc<dyn InsightBackend>,
        metrics: Arc<Metrics>,
    ) -> (Self, InsightWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashSet::new()));

        let queue = Self {
            tx,
            pending: Arc::clone(&pending),
            metrics: Arc::clone(&metrics),
        };
        let worker = InsightWorker {
            rx,
            pending,
            backend,
            min_interval: config.min_interval(),
            default_retry_after: config.default_retry_after(),
            metrics,
            last_completed: None,
        };
        (queue, worker)
    }

    /// Queue a request. A duplicate key resolves immediately as
    /// `Deduplicated` without being queued.
    pub fn enqueue(&self, request: InsightRequest) -> InsightTicket {
        let key = request.key();
        let (resolver, rx) = oneshot::channel();
        let ticket = InsightTicket {
            key: key.clone(),
            rx,
        };

        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !pending.insert(key.clone()) {
            drop(pending);
            debug!("Insight {} already pending, deduplicated", key);
            self.metrics.inc_insight_deduped();
            let _ = resolver.send(InsightOutcome::Deduplicated);
            return ticket;
        }

        let item = QueuedInsight {
            key: key.clone(),
            request,
            enqueued_at: Instant::now(),
            resolver,
        };
        if let Err(mpsc::error::SendError(item)) = self.tx.send(item) {
            pending.remove(&key);
            drop(pending);
            warn!("Insight worker stopped, cannot queue {}", key);
            let _ = item.resolver.send(InsightOutcome::Unavailable);
            return ticket;
        }

        debug!("Queued insight {} ({} pending)", key, pending.len());
        ticket
    }

    /// Whether a key is queued or in flight
    pub fn is_pending(&self, key: &InsightKey) -> bool {
        match self.pending.lock() {
            Ok(pending) => pending.contains(key),
            Err(poisoned) => poisoned.into_inner().contains(key),
        }
    }

    pub fn pending_len(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// The single consumer
pub struct InsightWorker {
    rx: mpsc::UnboundedReceiver<QueuedInsight>,
    pending: Arc<Mutex<HashSet<InsightKey>>>,
    backend: Arc<dyn InsightBackend>,
    min_interval: Duration,
    default_retry_after: Duration,
    metrics: Arc<Metrics>,
    last_completed: Option<Instant>,
}

impl InsightWorker {
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Insight worker started (min interval {:?})",
            self.min_interval
        );

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.resolve(item, InsightOutcome::Unavailable);
                    break;
                }
                outcome = self.process(&item) => outcome,
            };
            self.last_completed = Some(Instant::now());
            self.resolve(item, outcome);
        }

        // Anything still queued resolves as unavailable
        self.rx.close();
        while let Ok(item) = self.rx.try_recv() {
            self.resolve(item, InsightOutcome::Unavailable);
        }
        info!("Insight worker stopped");
    }

    async fn process(&self, item: &QueuedInsight) -> InsightOutcome {
        if let Some(last) = self.last_completed {
            tokio::time::sleep_until(last + self.min_interval).await;
        }

        debug!(
            "Calling insight backend for {} (queued {:?})",
            item.key,
            item.enqueued_at.elapsed()
        );
        self.metrics.inc_insight_calls();

        match self.backend.generate(&item.request).await {
            Ok(insight) => InsightOutcome::Generated(insight),
            Err(InsightError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(self.default_retry_after);
                warn!(
                    "Insight backend throttled {}; waiting {:?} and dropping it",
                    item.key, wait
                );
                self.metrics.inc_insight_throttled();
                tokio::time::sleep(wait).await;
                InsightOutcome::Throttled
            }
            Err(InsightError::NotConfigured) => InsightOutcome::Unavailable,
            Err(e) => {
                warn!("Insight {} failed: {}", item.key, e);
                self.metrics.inc_insight_failed();
                InsightOutcome::Failed(e.to_string())
            }
        }
    }

    fn resolve(&self, item: QueuedInsight, outcome: InsightOutcome) {
        // Release the key before resolving so a follow-up enqueue is fresh
        match self.pending.lock() {
            Ok(mut pending) => pending.remove(&item.key),
            Err(poisoned) => poisoned.into_inner().remove(&item.key),
        };
        debug!("Insight {} resolved: {}", item.key, outcome.as_str());
        let _ = item.resolver.send(outcome);
    }
}
