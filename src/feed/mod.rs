//! Upstream feed ingestion
//!
//! `FeedSource` abstracts the scoreboard; `Poller` turns successive fetches
//! into change events and is the only component that writes the state store.

pub mod espn;
pub mod poller;

pub use espn::EspnFeed;
pub use poller::{CycleReport, FeedEvent, Poller};

use crate::domain::GameSnapshot;
use crate::error::Result;
use async_trait::async_trait;

/// A polled source of game snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current state of every game on the board
    async fn fetch(&self) -> Result<Vec<GameSnapshot>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
