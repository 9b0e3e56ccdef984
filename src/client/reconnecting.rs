use futures_util::stream::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{BackoffPolicy, ConnectionState, ReconnectMachine};
use super::transport::{EventStream, StreamTransport};
use crate::error::{Result, ScorecastError};
use crate::services::Metrics;
use crate::stream::StreamMessage;

/// Why one connection ended
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    /// Server sent `reconnect`
    Directive,
    Dropped(String),
}

/// Subscriber that keeps a stream connection alive
pub struct ReconnectingClient {
    transport: Arc<dyn StreamTransport>,
    machine: ReconnectMachine,
    game: Option<String>,
    metrics: Option<Arc<Metrics>>,
}

impl ReconnectingClient {
    pub fn new(transport: Arc<dyn StreamTransport>, policy: BackoffPolicy) -> Self {
        Self {
            transport,
            machine: ReconnectMachine::new(policy),
            game: None,
            metrics: None,
        }
    }

    /// Only receive updates for one game
    pub fn with_game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn attempt(&self) -> u32 {
        self.machine.attempt()
    }

    /// Receive messages until cancelled.
    ///
    /// Returns `ReconnectExhausted` once the backoff policy gives up.
    pub async fn run<F>(&mut self, mut handler: F, cancel: CancellationToken) -> Result<()>
    where
        F: FnMut(StreamMessage) + Send,
    {
        loop {
            self.machine.begin_connect();
            debug!("Stream client: {}", self.machine.state());

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                opened = self.transport.open(self.game.as_deref()) => opened,
            };

            let end = match opened {
                Ok(mut events) => {
                    self.machine.on_connected();
                    info!("Stream client connected");
                    Self::consume(&mut events, &mut handler, &cancel).await
                }
                Err(e) => SessionEnd::Dropped(e.to_string()),
            };

            match end {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::Directive => {
                    self.machine.on_reconnect_directive();
                    info!("Server requested reconnect");
                }
                SessionEnd::Dropped(reason) => match self.machine.on_failure() {
                    ConnectionState::Backoff { attempt, delay } => {
                        warn!(
                            "Stream connection lost ({}); retrying in {:?} (attempt {}/{})",
                            reason,
                            delay,
                            attempt,
                            self.machine.policy().max_attempts
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    _ => {
                        let attempts = self.machine.attempt();
                        warn!("Stream connection lost ({}); giving up after {} attempts", reason, attempts);
                        return Err(ScorecastError::ReconnectExhausted { attempts });
                    }
                },
            }

            if let Some(metrics) = &self.metrics {
                metrics.inc_client_reconnects();
            }
        }
    }

    async fn consume<F>(events: &mut EventStream, handler: &mut F, cancel: &CancellationToken) -> SessionEnd
    where
        F: FnMut(StreamMessage) + Send,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                next = events.next() => next,
            };

            let raw = match next {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream closed".to_string()),
            };

            match StreamMessage::parse(&raw.event, &raw.data) {
                Ok(message) => {
                    let directive = matches!(message, StreamMessage::Reconnect(_));
                    handler(message);
                    if directive {
                        return SessionEnd::Directive;
                    }
                }
                Err(e) => warn!("Skipping stream event: {}", e),
            }
        }
    }
}
