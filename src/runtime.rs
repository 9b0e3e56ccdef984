//! Process wiring for the `serve` and `poll` commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::api::{create_router, AppState};
use crate::cache::MemoryCache;
use crate::config::AppConfig;
use crate::error::{Result, ScorecastError};
use crate::domain::GameSnapshot;
use crate::feed::{EspnFeed, FeedSource, Poller};
use crate::insight::{DisabledInsights, HttpInsightClient, InsightBackend, InsightQueue};
use crate::notify::{Dispatcher, LogSink, NotificationEngine, WebhookSink};
use crate::services::{HealthState, Metrics};
use crate::state::StateStore;
use crate::stream::Broadcaster;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(300);

fn feed_source(config: &AppConfig) -> Result<Arc<dyn FeedSource>> {
    let feed = EspnFeed::new(
        config.feed.url.clone(),
        Duration::from_secs(config.feed.request_timeout_secs),
    )?;
    Ok(Arc::new(feed))
}

fn insight_backend(config: &AppConfig) -> Result<Arc<dyn InsightBackend>> {
    match HttpInsightClient::from_config(&config.insight)? {
        Some(client) => {
            info!("Insight backend: {}", client.url());
            Ok(Arc::new(client))
        }
        None => {
            warn!("No insight endpoint configured, notifications go out without insights");
            Ok(Arc::new(DisabledInsights))
        }
    }
}

fn dispatcher(config: &AppConfig) -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new().with_sink(Arc::new(LogSink));
    if let Some(url) = config.notifications.webhook_url.as_deref() {
        if !url.trim().is_empty() {
            dispatcher = dispatcher.with_sink(Arc::new(WebhookSink::new(url.trim())?));
        }
    }
    Ok(dispatcher)
}

fn check(config: &AppConfig) -> Result<()> {
    config
        .validate()
        .map_err(|problems| ScorecastError::InvalidConfig(problems.join("; ")))
}

/// Run the full service until ctrl-c: poller, broadcaster, notification
/// engine, insight worker and the HTTP server.
pub async fn serve(config: AppConfig) -> Result<()> {
    check(&config)?;

    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(HealthState::new(
        Arc::clone(&metrics),
        config.feed.poll_interval(),
    ));

    let root = CancellationToken::new();
    let tasks = TaskTracker::new();

    // State
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(StateStore::new(
        cache.clone(),
        config.cache.clone(),
        config.feed.poll_interval(),
    ));

    // Fan-out
    let broadcaster = Arc::new(Broadcaster::new(
        &config.stream,
        root.child_token(),
        Arc::clone(&metrics),
    ));

    // Insights
    let (insights, worker) = InsightQueue::new(
        &config.insight,
        insight_backend(&config)?,
        Arc::clone(&metrics),
    );
    tasks.spawn(worker.run(root.child_token()));

    // Notifications
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let engine = NotificationEngine::new(
        config.notifications.clone(),
        insights.clone(),
        dispatcher(&config)?,
        Arc::clone(&metrics),
    );
    tasks.spawn(engine.run(notify_rx, root.child_token()));

    // Poller
    let poller = Poller::new(feed_source(&config)?, store, config.feed.poll_interval())
        .with_broadcast(broadcaster.sender())
        .with_notifications(notify_tx)
        .with_metrics(Arc::clone(&metrics))
        .with_health(Arc::clone(&health));
    tasks.spawn(poller.run(root.child_token()));

    // Housekeeping
    {
        let cancel = root.child_token();
        let metrics = Arc::clone(&metrics);
        tasks.spawn(async move {
            let mut purge = tokio::time::interval(CACHE_PURGE_INTERVAL);
            let mut status = tokio::time::interval(STATUS_LOG_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = purge.tick() => {
                        cache.purge_expired();
                    }
                    _ = status.tick() => metrics.log_status(),
                }
            }
        });
    }

    // HTTP
    let app = create_router(AppState::new(broadcaster, insights, health));
    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Live feed server listening on {}", addr);

    let shutdown = root.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    let result = server.await;
    root.cancel();
    tasks.close();
    tasks.wait().await;
    metrics.log_status();
    info!("Shutdown complete");

    result.map_err(ScorecastError::Io)
}

/// Fetch the feed once and return what it contains
pub async fn fetch_board(config: &AppConfig) -> Result<Vec<GameSnapshot>> {
    check(config)?;
    let feed = feed_source(config)?;
    let games = feed.fetch().await?;
    info!("Fetched {} games from {}", games.len(), feed.name());
    Ok(games)
}
