//! Game snapshots and the change events diffed from them

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Game lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GameStatus {
    Scheduled,
    Live,
    Halftime,
    Final,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::Live => "live",
            GameStatus::Halftime => "halftime",
            GameStatus::Final => "final",
        }
    }

    /// Position in the lifecycle
    fn rank(&self) -> u8 {
        match self {
            GameStatus::Scheduled => 0,
            GameStatus::Live => 1,
            GameStatus::Halftime => 2,
            GameStatus::Final => 3,
        }
    }

    /// Check if this status can be followed by another one
    pub fn can_transition_to(&self, target: GameStatus) -> bool {
        use GameStatus::*;

        match (self, target) {
            (a, b) if a == &b => true,
            // Play resumes after the break
            (Halftime, Live) => true,
            (Final, _) => false,
            (a, b) => b.rank() > a.rank(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GameStatus::Final)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, GameStatus::Live | GameStatus::Halftime)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields compared between consecutive polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedField {
    Status,
    HomeScore,
    AwayScore,
    Period,
    Clock,
}

/// Last known state of a single game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub id: String,
    pub status: GameStatus,
    pub home_score: u32,
    pub away_score: u32,
    pub period: u32,
    pub clock: String,
    #[serde(default)]
    pub home_abbr: String,
    #[serde(default)]
    pub away_abbr: String,
    /// Scheduled calendar date (UTC)
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub last_updated: DateTime<Utc>,
}

impl GameSnapshot {
    /// Absolute score margin
    pub fn margin(&self) -> u32 {
        self.home_score.abs_diff(self.away_score)
    }

    /// Tracked fields that differ from `previous`
    pub fn changed_fields(&self, previous: &GameSnapshot) -> BTreeSet<TrackedField> {
        let mut changed = BTreeSet::new();
        if self.status != previous.status {
            changed.insert(TrackedField::Status);
        }
        if self.home_score != previous.home_score {
            changed.insert(TrackedField::HomeScore);
        }
        if self.away_score != previous.away_score {
            changed.insert(TrackedField::AwayScore);
        }
        if self.period != previous.period {
            changed.insert(TrackedField::Period);
        }
        if self.clock != previous.clock {
            changed.insert(TrackedField::Clock);
        }
        changed
    }
}

/// A detected difference between consecutive polls of one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_id: String,
    pub previous: GameSnapshot,
    pub current: GameSnapshot,
    pub changed: BTreeSet<TrackedField>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Diff a freshly polled snapshot against the cached one.
    ///
    /// Returns `None` on first observation (nothing cached) and when no
    /// tracked field changed.
    pub fn detect(previous: Option<&GameSnapshot>, current: &GameSnapshot) -> Option<Self> {
        let previous = previous?;
        let changed = current.changed_fields(previous);
        if changed.is_empty() {
            return None;
        }

        Some(Self {
            entity_id: current.id.clone(),
            previous: previous.clone(),
            current: current.clone(),
            changed,
            timestamp: Utc::now(),
        })
    }

    pub fn status_changed(&self) -> bool {
        self.changed.contains(&TrackedField::Status)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::snapshot;
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use GameStatus::*;
        assert!(Scheduled.can_transition_to(Live));
        assert!(Live.can_transition_to(Halftime));
        assert!(Halftime.can_transition_to(Live));
        assert!(Halftime.can_transition_to(Final));
        assert!(Scheduled.can_transition_to(Final));
        assert!(!Final.can_transition_to(Live));
        assert!(!Halftime.can_transition_to(Scheduled));
        assert!(!Live.can_transition_to(Scheduled));
    }

    #[test]
    fn test_first_observation_has_no_event() {
        let current = snapshot("G1", GameStatus::Live, 10, 8, 1);
        assert!(ChangeEvent::detect(None, &current).is_none());
    }

    #[test]
    fn test_identical_snapshots_have_no_event() {
        let previous = snapshot("G1", GameStatus::Live, 10, 8, 1);
        let mut current = previous.clone();
        // lastUpdated and team metadata are not tracked
        current.last_updated = Utc::now();
        current.home_abbr = "XXX".to_string();
        assert!(ChangeEvent::detect(Some(&previous), &current).is_none());
    }

    #[test]
    fn test_changed_fields_reported() {
        let previous = snapshot("G1", GameStatus::Scheduled, 0, 0, 0);
        let mut current = snapshot("G1", GameStatus::Live, 10, 8, 1);
        current.clock = "7:31".to_string();

        let event = ChangeEvent::detect(Some(&previous), &current).unwrap();
        assert_eq!(event.entity_id, "G1");
        assert!(event.status_changed());
        assert_eq!(event.changed.len(), 5);
    }

    #[test]
    fn test_margin() {
        assert_eq!(snapshot("G", GameStatus::Live, 97, 100, 4).margin(), 3);
        assert_eq!(snapshot("G", GameStatus::Live, 100, 97, 4).margin(), 3);
    }
}
