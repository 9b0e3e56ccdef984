use clap::Parser;
use scorecast::cli::{self, Cli, Commands};
use scorecast::config::{AppConfig, LoggingConfig};
use scorecast::error::Result;
use scorecast::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;

    match &cli.command {
        Commands::Serve => {
            init_logging(&config.logging);
            info!(
                "Starting scorecast: feed={} poll={}s port={}",
                config.feed.url, config.feed.poll_interval_secs, config.server.port
            );
            runtime::serve(config).await?;
        }
        Commands::Watch { game } => {
            init_logging_simple();
            cli::watch(&config.client, game.clone()).await?;
        }
        Commands::Poll => {
            init_logging_simple();
            let games = runtime::fetch_board(&config).await?;
            cli::print_board(&games);
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},scorecast=debug", logging.level)));

    let log_dir = std::env::var("SCORECAST_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .ok();

    // `rolling::daily` panics when it cannot create the first file, so check
    // writability up front.
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let marker = std::path::Path::new(dir).join(".scorecast_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&marker) {
            Ok(_) => {
                let _ = std::fs::remove_file(&marker);
                let appender = tracing_appender::rolling::daily(dir, "scorecast.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                // Lives for the whole process
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
                None
            }
        }
    });

    let (plain, json) = if logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/scorecast.log", dir);
    }
}

fn init_logging_simple() {
    // Terminal commands only want warnings
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
