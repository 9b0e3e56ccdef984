//! Named events carried on the push stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChangeEvent, GameStatus, TrackedField};
use crate::error::{Result, ScorecastError};

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_GAME_UPDATE: &str = "gameUpdate";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_RECONNECT: &str = "reconnect";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    /// When the server will send `reconnect` and close
    pub expires_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    pub id: String,
    pub home_score: u32,
    pub away_score: u32,
    pub period: u32,
    pub clock: String,
    pub status: GameStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub changed_fields: Vec<TrackedField>,
}

impl From<&ChangeEvent> for GameUpdate {
    fn from(event: &ChangeEvent) -> Self {
        let s = &event.current;
        Self {
            id: s.id.clone(),
            home_score: s.home_score,
            away_score: s.away_score,
            period: s.period,
            clock: s.clock.clone(),
            status: s.status,
            timestamp: event.timestamp,
            changed_fields: event.changed.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFault {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconnect {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// One event on a subscriber connection
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Connected(Connected),
    GameUpdate(GameUpdate),
    Heartbeat(Heartbeat),
    Error(StreamFault),
    Reconnect(Reconnect),
}

impl StreamMessage {
    pub fn heartbeat() -> Self {
        StreamMessage::Heartbeat(Heartbeat {
            timestamp: Utc::now(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamMessage::Error(StreamFault {
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn reconnect(reason: impl Into<String>) -> Self {
        StreamMessage::Reconnect(Reconnect {
            reason: reason.into(),
            timestamp: Utc::now(),
        })
    }

    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamMessage::Connected(_) => EVENT_CONNECTED,
            StreamMessage::GameUpdate(_) => EVENT_GAME_UPDATE,
            StreamMessage::Heartbeat(_) => EVENT_HEARTBEAT,
            StreamMessage::Error(_) => EVENT_ERROR,
            StreamMessage::Reconnect(_) => EVENT_RECONNECT,
        }
    }

    /// JSON payload for the SSE `data:` field
    pub fn data(&self) -> Result<String> {
        let json = match self {
            StreamMessage::Connected(p) => serde_json::to_string(p)?,
            StreamMessage::GameUpdate(p) => serde_json::to_string(p)?,
            StreamMessage::Heartbeat(p) => serde_json::to_string(p)?,
            StreamMessage::Error(p) => serde_json::to_string(p)?,
            StreamMessage::Reconnect(p) => serde_json::to_string(p)?,
        };
        Ok(json)
    }

    /// Decode a received event; unknown names and bad payloads are parse errors
    pub fn parse(event: &str, data: &str) -> Result<Self> {
        let bad = |reason: String| ScorecastError::StreamParse {
            event: event.to_string(),
            reason,
        };

        let message = match event {
            EVENT_CONNECTED => {
                StreamMessage::Connected(serde_json::from_str(data).map_err(|e| bad(e.to_string()))?)
            }
            EVENT_GAME_UPDATE => {
                StreamMessage::GameUpdate(serde_json::from_str(data).map_err(|e| bad(e.to_string()))?)
            }
            EVENT_HEARTBEAT => {
                StreamMessage::Heartbeat(serde_json::from_str(data).map_err(|e| bad(e.to_string()))?)
            }
            EVENT_ERROR => {
                StreamMessage::Error(serde_json::from_str(data).map_err(|e| bad(e.to_string()))?)
            }
            EVENT_RECONNECT => {
                StreamMessage::Reconnect(serde_json::from_str(data).map_err(|e| bad(e.to_string()))?)
            }
            other => return Err(bad(format!("unknown event type '{}'", other))),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game::fixtures::snapshot;

    #[test]
    fn test_game_update_payload_shape() {
        let previous = snapshot("G1", GameStatus::Live, 10, 8, 1);
        let current = snapshot("G1", GameStatus::Live, 12, 8, 1);
        let event = ChangeEvent::detect(Some(&previous), &current).unwrap();

        let message = StreamMessage::GameUpdate(GameUpdate::from(&event));
        assert_eq!(message.event_name(), "gameUpdate");

        let json: serde_json::Value = serde_json::from_str(&message.data().unwrap()).unwrap();
        for field in ["id", "homeScore", "awayScore", "period", "clock", "status", "timestamp"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["homeScore"], 12);
        assert_eq!(json["changedFields"], serde_json::json!(["homeScore"]));
    }

    #[test]
    fn test_parse_known_events() {
        let heartbeat = StreamMessage::heartbeat();
        let parsed = StreamMessage::parse("heartbeat", &heartbeat.data().unwrap()).unwrap();
        assert_eq!(parsed, heartbeat);

        let reconnect = StreamMessage::parse(
            "reconnect",
            r#"{"reason":"max connection lifetime reached","timestamp":"2025-01-15T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(reconnect.event_name(), "reconnect");
    }

    #[test]
    fn test_parse_rejects_malformed_events() {
        let err = StreamMessage::parse("gameUpdate", "{\"id\":").unwrap_err();
        assert!(matches!(err, ScorecastError::StreamParse { ref event, .. } if event == "gameUpdate"));

        let err = StreamMessage::parse("scoreboard", "{}").unwrap_err();
        assert!(matches!(err, ScorecastError::StreamParse { .. }));
    }
}
