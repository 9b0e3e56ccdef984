//! ESPN Live Scoreboard Feed
//!
//! Fetches live NBA game data from ESPN's public scoreboard API.
//! No API key required.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::FeedSource;
use crate::domain::{GameSnapshot, GameStatus};
use crate::error::{Result, ScorecastError};

// ── ESPN JSON deserialization structs ────────────────────────────

#[derive(Debug, Deserialize)]
struct EspnResponse {
    #[serde(default)]
    events: Vec<EspnEvent>,
}

#[derive(Debug, Deserialize)]
struct EspnEvent {
    id: String,
    #[serde(default)]
    date: Option<String>,
    competitions: Vec<EspnCompetition>,
}

#[derive(Debug, Deserialize)]
struct EspnCompetition {
    competitors: Vec<EspnCompetitor>,
    status: EspnStatus,
}

#[derive(Debug, Deserialize)]
struct EspnCompetitor {
    team: EspnTeam,
    #[serde(rename = "homeAway")]
    home_away: String,
    score: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EspnTeam {
    abbreviation: String,
}

#[derive(Debug, Deserialize)]
struct EspnStatus {
    #[serde(default)]
    period: u32,
    #[serde(rename = "displayClock", default)]
    display_clock: String,
    #[serde(rename = "type")]
    status_type: EspnStatusType,
}

#[derive(Debug, Deserialize)]
struct EspnStatusType {
    state: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
}

// ── Feed client ─────────────────────────────────────────────────

/// ESPN live scoreboard feed
pub struct EspnFeed {
    http: reqwest::Client,
    url: String,
}

impl EspnFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("scorecast/0.1")
            .build()
            .map_err(|e| ScorecastError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Parse a scoreboard payload into snapshots, skipping events that do not
    /// describe a two-team game with a known status.
    pub fn parse_scoreboard(body: &str) -> Result<Vec<GameSnapshot>> {
        let data: EspnResponse = serde_json::from_str(body)
            .map_err(|e| ScorecastError::InvalidFeedData(format!("scoreboard JSON: {}", e)))?;

        let now = Utc::now();
        Ok(data
            .events
            .iter()
            .filter_map(|event| Self::parse_event(event, now))
            .collect())
    }

    fn parse_event(event: &EspnEvent, now: DateTime<Utc>) -> Option<GameSnapshot> {
        let comp = event.competitions.first()?;
        let home = comp.competitors.iter().find(|c| c.home_away == "home")?;
        let away = comp.competitors.iter().find(|c| c.home_away == "away")?;

        let status = match Self::map_status(&comp.status.status_type) {
            Some(status) => status,
            None => {
                debug!(
                    "ESPN: skipping event {} with status {:?}",
                    event.id, comp.status.status_type.state
                );
                return None;
            }
        };

        Some(GameSnapshot {
            id: event.id.clone(),
            status,
            home_score: Self::parse_score(home.score.as_deref()),
            away_score: Self::parse_score(away.score.as_deref()),
            period: comp.status.period,
            clock: comp.status.display_clock.clone(),
            home_abbr: home.team.abbreviation.clone(),
            away_abbr: away.team.abbreviation.clone(),
            date: event.date.as_deref().and_then(Self::parse_date),
            last_updated: now,
        })
    }

    fn map_status(status: &EspnStatusType) -> Option<GameStatus> {
        if status.name.as_deref() == Some("STATUS_HALFTIME") {
            return Some(GameStatus::Halftime);
        }
        match status.state.as_str() {
            "pre" => Some(GameStatus::Scheduled),
            "in" => Some(GameStatus::Live),
            // Postponed, canceled and suspended games are also "post"
            "post" => {
                let finished = status.completed.unwrap_or_else(|| {
                    status
                        .name
                        .as_deref()
                        .is_some_and(|name| name.starts_with("STATUS_FINAL"))
                });
                finished.then_some(GameStatus::Final)
            }
            _ => None,
        }
    }

    fn parse_score(score: Option<&str>) -> u32 {
        score.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
    }

    /// ESPN dates look like "2025-01-15T00:30Z"
    fn parse_date(raw: &str) -> Option<NaiveDate> {
        DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc).date_naive())
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ")
                    .map(|d| d.and_utc().date_naive())
            })
            .ok()
    }
}

#[async_trait]
impl FeedSource for EspnFeed {
    async fn fetch(&self) -> Result<Vec<GameSnapshot>> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ScorecastError::Upstream(format!("scoreboard request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScorecastError::Upstream(format!(
                "scoreboard returned HTTP {}",
                status
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ScorecastError::Upstream(format!("scoreboard body read failed: {}", e)))?;
        let games = Self::parse_scoreboard(&body)?;

        debug!("ESPN: fetched {} games", games.len());
        Ok(games)
    }

    fn name(&self) -> &str {
        "espn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOREBOARD: &str = r#"{
        "events": [
            {
                "id": "401584701",
                "date": "2025-01-15T00:30Z",
                "competitions": [{
                    "competitors": [
                        {"team": {"abbreviation": "BOS"}, "homeAway": "home", "score": "55"},
                        {"team": {"abbreviation": "LAL"}, "homeAway": "away", "score": "52"}
                    ],
                    "status": {
                        "period": 2,
                        "displayClock": "0.0",
                        "type": {"state": "in", "name": "STATUS_HALFTIME"}
                    }
                }]
            },
            {
                "id": "401584702",
                "date": "2025-01-15T03:00Z",
                "competitions": [{
                    "competitors": [
                        {"team": {"abbreviation": "DEN"}, "homeAway": "home", "score": "100"},
                        {"team": {"abbreviation": "PHX"}, "homeAway": "away", "score": "97"}
                    ],
                    "status": {
                        "period": 4,
                        "displayClock": "2:14",
                        "type": {"state": "in", "name": "STATUS_IN_PROGRESS"}
                    }
                }]
            },
            {
                "id": "401584703",
                "competitions": [{
                    "competitors": [
                        {"team": {"abbreviation": "NYK"}, "homeAway": "home"},
                        {"team": {"abbreviation": "MIA"}, "homeAway": "away"}
                    ],
                    "status": {"period": 0, "displayClock": "0:00", "type": {"state": "pre"}}
                }]
            },
            {
                "id": "401584704",
                "competitions": [{
                    "competitors": [
                        {"team": {"abbreviation": "GSW"}, "homeAway": "home", "score": "0"}
                    ],
                    "status": {"period": 0, "displayClock": "0:00", "type": {"state": "pre"}}
                }]
            }
        ]
    }"#;

    #[test]
    fn test_parse_scoreboard() {
        let games = EspnFeed::parse_scoreboard(SCOREBOARD).unwrap();
        // The single-competitor event is dropped
        assert_eq!(games.len(), 3);

        let half = &games[0];
        assert_eq!(half.id, "401584701");
        assert_eq!(half.status, GameStatus::Halftime);
        assert_eq!((half.home_score, half.away_score), (55, 52));
        assert_eq!(half.home_abbr, "BOS");
        assert_eq!(half.away_abbr, "LAL");
        assert_eq!(half.date, NaiveDate::from_ymd_opt(2025, 1, 15));

        let live = &games[1];
        assert_eq!(live.status, GameStatus::Live);
        assert_eq!(live.period, 4);
        assert_eq!(live.clock, "2:14");

        let scheduled = &games[2];
        assert_eq!(scheduled.status, GameStatus::Scheduled);
        assert_eq!((scheduled.home_score, scheduled.away_score), (0, 0));
        assert_eq!(scheduled.date, None);
    }

    fn status_type(state: &str, name: Option<&str>, completed: Option<bool>) -> EspnStatusType {
        EspnStatusType {
            state: state.into(),
            name: name.map(Into::into),
            completed,
        }
    }

    #[test]
    fn test_final_and_unknown_states() {
        let final_status = status_type("post", Some("STATUS_FINAL"), Some(true));
        assert_eq!(EspnFeed::map_status(&final_status), Some(GameStatus::Final));

        let overtime = status_type("post", Some("STATUS_FINAL_OT"), None);
        assert_eq!(EspnFeed::map_status(&overtime), Some(GameStatus::Final));

        let unknown = status_type("delayed", None, None);
        assert_eq!(EspnFeed::map_status(&unknown), None);
    }

    #[test]
    fn test_postponed_and_canceled_games_are_skipped() {
        for name in ["STATUS_POSTPONED", "STATUS_CANCELED", "STATUS_SUSPENDED"] {
            let status = status_type("post", Some(name), Some(false));
            assert_eq!(EspnFeed::map_status(&status), None, "{}", name);
            let no_flag = status_type("post", Some(name), None);
            assert_eq!(EspnFeed::map_status(&no_flag), None, "{}", name);
        }

        let board = r#"{"events": [{
            "id": "401584799",
            "date": "2025-01-16T00:00Z",
            "competitions": [{
                "competitors": [
                    {"team": {"abbreviation": "LAL"}, "homeAway": "home", "score": "0"},
                    {"team": {"abbreviation": "LAC"}, "homeAway": "away", "score": "0"}
                ],
                "status": {
                    "period": 0,
                    "displayClock": "0:00",
                    "type": {"state": "post", "name": "STATUS_POSTPONED", "completed": false}
                }
            }]
        }]}"#;
        assert!(EspnFeed::parse_scoreboard(board).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_invalid_feed_data() {
        let err = EspnFeed::parse_scoreboard("{not json").unwrap_err();
        assert!(matches!(err, ScorecastError::InvalidFeedData(_)));
    }
}
