use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{BackoffPolicy, ReconnectingClient, SseTransport};
use crate::config::ClientConfig;
use crate::domain::GameSnapshot;
use crate::error::Result;
use crate::stream::StreamMessage;

/// Live game feed service
#[derive(Parser, Debug)]
#[command(name = "scorecast")]
#[command(author, version, about = "Live game scores with push updates and transition alerts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and the per-environment overrides
    #[arg(long, default_value = "config", env = "SCORECAST_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the poller, stream server and notification engine
    Serve,
    /// Follow a running server's live stream in the terminal
    Watch {
        /// Only show updates for this game
        #[arg(short, long)]
        game: Option<String>,
    },
    /// Fetch the feed once and print what it contains
    Poll,
}

/// Print one stream message as a terminal line
pub fn render(message: &StreamMessage) -> Option<String> {
    match message {
        StreamMessage::Connected(c) => Some(format!(
            "\x1b[32m● connected\x1b[0m {} (until {})",
            c.connection_id,
            c.expires_at.format("%H:%M:%S")
        )),
        StreamMessage::GameUpdate(u) => {
            let fields: Vec<String> = u.changed_fields.iter().map(|f| format!("{:?}", f)).collect();
            Some(format!(
                "{:<12} {:>3}-{:<3} P{} {:>6}  {:<9} [{}]",
                u.id,
                u.home_score,
                u.away_score,
                u.period,
                u.clock,
                u.status.to_string(),
                fields.join(",")
            ))
        }
        StreamMessage::Heartbeat(_) => None,
        StreamMessage::Error(e) => Some(format!("\x1b[33m! {}\x1b[0m", e.message)),
        StreamMessage::Reconnect(r) => Some(format!("\x1b[36m↻ reconnecting: {}\x1b[0m", r.reason)),
    }
}

/// Follow the server's stream until ctrl-c or until reconnects are exhausted
pub async fn watch(config: &ClientConfig, game: Option<String>) -> Result<()> {
    let transport = Arc::new(SseTransport::new(config.url.clone()));
    let mut client = ReconnectingClient::new(transport, BackoffPolicy::from(config));
    if let Some(game) = game {
        client = client.with_game(game);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    println!("Watching {} (ctrl-c to stop)", config.url);
    client
        .run(
            |message| {
                if let Some(line) = render(&message) {
                    println!("{}", line);
                }
            },
            cancel,
        )
        .await?;
    info!("Watch stopped");
    Ok(())
}

/// Print the board as one line per game
pub fn print_board(games: &[GameSnapshot]) {
    if games.is_empty() {
        println!("No games on the board");
        return;
    }
    for g in games {
        println!(
            "{:<12} {:>4} {:>3} - {:<3} {:<4} P{} {:>6}  {}",
            g.id, g.away_abbr, g.away_score, g.home_score, g.home_abbr, g.period, g.clock, g.status
        );
    }
    println!("{} games", games.len());
}
