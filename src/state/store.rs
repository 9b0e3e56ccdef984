//! Typed snapshot store over the cache collaborator
//!
//! Holds the last observed snapshot of every tracked game. Only the poller
//! writes here; everything downstream learns about state through change
//! events.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::config::CacheConfig;
use crate::domain::{GameSnapshot, GameStatus};

const GAME_KEY_PREFIX: &str = "game:";

/// Cache lifetime class of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// Game in progress
    Live,
    /// Scheduled or finished today
    Today,
    /// Anything from a previous day
    Historical,
    /// Reference data that rarely changes
    Static,
}

impl TtlTier {
    /// Tier for a polled game, relative to `today` (UTC)
    pub fn for_snapshot(snapshot: &GameSnapshot, today: NaiveDate) -> Self {
        if snapshot.status.is_in_progress() {
            return TtlTier::Live;
        }
        match snapshot.date {
            Some(date) if date < today => TtlTier::Historical,
            _ => TtlTier::Today,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TtlTier::Live => "live",
            TtlTier::Today => "today",
            TtlTier::Historical => "historical",
            TtlTier::Static => "static",
        }
    }
}

/// Last known state of each game, with tiered expiry
pub struct StateStore {
    cache: Arc<dyn CacheStore>,
    config: CacheConfig,
    ttl_floor: Duration,
}

impl StateStore {
    /// `poll_interval` sets the default TTL floor: an entry must outlive one
    /// poll cycle or every live game would look like a first observation.
    pub fn new(cache: Arc<dyn CacheStore>, config: CacheConfig, poll_interval: Duration) -> Self {
        let ttl_floor = if config.ttl_floor_secs > 0 {
            Duration::from_secs(config.ttl_floor_secs)
        } else {
            poll_interval * 2
        };
        Self {
            cache,
            config,
            ttl_floor,
        }
    }

    fn key(id: &str) -> String {
        format!("{}{}", GAME_KEY_PREFIX, id)
    }

    /// TTL applied to entries of a tier
    pub fn ttl_for(&self, tier: TtlTier) -> Duration {
        let secs = match tier {
            TtlTier::Live => self.config.live_ttl_secs,
            TtlTier::Today => self.config.today_ttl_secs,
            TtlTier::Historical => self.config.historical_ttl_secs,
            TtlTier::Static => self.config.static_ttl_secs,
        };
        Duration::from_secs(secs).max(self.ttl_floor)
    }

    /// Last cached snapshot.
    ///
    /// Backend failures and undecodable entries read as absent, which the
    /// poller treats as a first observation.
    pub async fn get(&self, id: &str) -> Option<GameSnapshot> {
        let raw = match self.cache.get(&Self::key(id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("State store read failed for {}: {}", id, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Discarding undecodable snapshot for {}: {}", id, e);
                None
            }
        }
    }

    /// Store a snapshot under its tier's TTL. Failures are logged, not raised.
    pub async fn put(&self, snapshot: &GameSnapshot, tier: TtlTier) {
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to encode snapshot {}: {}", snapshot.id, e);
                return;
            }
        };

        let ttl = self.ttl_for(tier);
        match self.cache.set(&Self::key(&snapshot.id), raw, ttl).await {
            Ok(()) => debug!(
                "Stored {} ({}, tier {}, ttl {:?})",
                snapshot.id,
                snapshot.status,
                tier.as_str(),
                ttl
            ),
            Err(e) => warn!("State store write failed for {}: {}", snapshot.id, e),
        }
    }

    /// Store a polled snapshot, choosing its tier from status and date
    pub async fn refresh(&self, snapshot: &GameSnapshot) {
        let tier = TtlTier::for_snapshot(snapshot, Utc::now().date_naive());
        self.put(snapshot, tier).await;
    }

    /// Drop every cached game
    pub async fn clear(&self) -> usize {
        match self.cache.delete_by_pattern(GAME_KEY_PREFIX).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("State store clear failed: {}", e);
                0
            }
        }
    }

    /// Status of a cached game, mostly for diagnostics
    pub async fn status_of(&self, id: &str) -> Option<GameStatus> {
        self.get(id).await.map(|s| s.status)
    }
}
