pub mod api;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod insight;
pub mod notify;
pub mod runtime;
pub mod services;
pub mod state;
pub mod stream;

pub use client::{BackoffPolicy, ConnectionState, ReconnectingClient};
pub use config::AppConfig;
pub use domain::{ChangeEvent, GameSnapshot, GameStatus, Notification, TransitionType};
pub use error::{Result, ScorecastError};
pub use feed::{FeedSource, Poller};
pub use insight::{InsightOutcome, InsightQueue};
pub use notify::NotificationEngine;
pub use state::StateStore;
pub use stream::{Broadcaster, StreamMessage};
