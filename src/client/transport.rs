//! Stream transports for the subscriber client

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::Client;
use reqwest_eventsource::{retry::Never, Event, EventSource};
use tracing::debug;

use crate::error::{Result, ScorecastError};

/// One named event as received off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Events of one open connection; the stream ends when the connection drops
pub type EventStream = BoxStream<'static, Result<RawEvent>>;

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a connection, resolving once the server has accepted it
    async fn open(&self, game: Option<&str>) -> Result<EventStream>;
}

/// Server-Sent Events over HTTP
pub struct SseTransport {
    http: Client,
    url: String,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn open(&self, game: Option<&str>) -> Result<EventStream> {
        let mut request = self.http.get(&self.url);
        if let Some(game) = game {
            request = request.query(&[("game", game)]);
        }

        let mut es = EventSource::new(request)
            .map_err(|e| ScorecastError::Transport(format!("cannot build stream request: {}", e)))?;
        // Reconnects are ours to schedule
        es.set_retry_policy(Box::new(Never));

        match es.next().await {
            Some(Ok(Event::Open)) => debug!("Stream opened: {}", self.url),
            Some(Ok(Event::Message(msg))) => {
                return Err(ScorecastError::Transport(format!(
                    "unexpected '{}' before open",
                    msg.event
                )))
            }
            Some(Err(e)) => {
                es.close();
                return Err(ScorecastError::Transport(e.to_string()));
            }
            None => return Err(ScorecastError::Transport("stream closed before open".into())),
        }

        let events = es
            .filter_map(|event| async move {
                match event {
                    Ok(Event::Message(msg)) => Some(Ok(RawEvent {
                        event: msg.event,
                        data: msg.data,
                    })),
                    Ok(Event::Open) => None,
                    Err(reqwest_eventsource::Error::StreamEnded) => None,
                    Err(e) => Some(Err(ScorecastError::Transport(e.to_string()))),
                }
            })
            .boxed();
        Ok(events)
    }
}
