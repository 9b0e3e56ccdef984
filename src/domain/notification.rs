//! Transitions, notifications and insight requests

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::game::{GameSnapshot, GameStatus};

/// Transitions that raise a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionType {
    EnteredHalftime,
    EnteredFinal,
    CloseGame,
}

impl TransitionType {
    /// Short suffix used in queue keys (`G1-halftime`)
    pub fn key_suffix(&self) -> &'static str {
        match self {
            TransitionType::EnteredHalftime => "halftime",
            TransitionType::EnteredFinal => "final",
            TransitionType::CloseGame => "close",
        }
    }

    /// Transition raised by entering a status, if any
    pub fn for_status(status: GameStatus) -> Option<Self> {
        match status {
            GameStatus::Halftime => Some(TransitionType::EnteredHalftime),
            GameStatus::Final => Some(TransitionType::EnteredFinal),
            _ => None,
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionType::EnteredHalftime => write!(f, "HALFTIME"),
            TransitionType::EnteredFinal => write!(f, "FINAL"),
            TransitionType::CloseGame => write!(f, "CLOSE_GAME"),
        }
    }
}

/// Key identifying one insight request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsightKey {
    pub entity_id: String,
    pub transition: TransitionType,
}

impl InsightKey {
    pub fn new(entity_id: impl Into<String>, transition: TransitionType) -> Self {
        Self {
            entity_id: entity_id.into(),
            transition,
        }
    }
}

impl fmt::Display for InsightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entity_id, self.transition.key_suffix())
    }
}

/// Body sent to the insight backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub entity_id: String,
    pub transition_type: TransitionType,
    pub home_abbr: String,
    pub away_abbr: String,
    pub date: Option<NaiveDate>,
}

impl InsightRequest {
    pub fn for_snapshot(snapshot: &GameSnapshot, transition: TransitionType) -> Self {
        Self {
            entity_id: snapshot.id.clone(),
            transition_type: transition,
            home_abbr: snapshot.home_abbr.clone(),
            away_abbr: snapshot.away_abbr.clone(),
            date: snapshot.date,
        }
    }

    pub fn key(&self) -> InsightKey {
        InsightKey::new(self.entity_id.clone(), self.transition_type)
    }
}

/// Generated commentary returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub summary: String,
    pub model: String,
}

/// Ledger entry; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub entity_id: String,
    pub transition: TransitionType,
    pub fired_at: DateTime<Utc>,
    pub insight_requested: bool,
    pub insight: Option<String>,
}

impl NotificationRecord {
    pub fn new(entity_id: impl Into<String>, transition: TransitionType, insight_requested: bool) -> Self {
        Self {
            entity_id: entity_id.into(),
            transition,
            fired_at: Utc::now(),
            insight_requested,
            insight: None,
        }
    }
}

/// User-facing notification handed to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub record: NotificationRecord,
    pub snapshot: GameSnapshot,
    pub insight: Option<Insight>,
}

impl Notification {
    /// Plain-text rendering used by log and webhook sinks
    pub fn headline(&self) -> String {
        let s = &self.snapshot;
        let score = format!(
            "{} {} - {} {}",
            s.away_abbr, s.away_score, s.home_score, s.home_abbr
        );
        let text = match self.record.transition {
            TransitionType::EnteredHalftime => format!("Halftime: {}", score),
            TransitionType::EnteredFinal => format!("Final: {}", score),
            TransitionType::CloseGame => format!("Close game in Q{} ({}): {}", s.period, s.clock, score),
        };
        match &self.insight {
            Some(insight) => format!("{}\n{}", text, insight.summary),
            None => text,
        }
    }
}
