//! studysync - command line front end of the sync engine.

mod http;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use studysync_core::app::{TriggerSource, WorkerSettings};
use studysync_core::config::{self, ENV_API_TOKEN, SyncConfig};
use studysync_core::store::Database;
use studysync_core::{Engine, EngineBuilder};
use tracing::info;

use crate::http::HttpApiClient;

#[derive(Parser)]
#[command(name = "studysync", version, about = "Keep a local copy of study progress in sync")]
struct Cli {
    /// Settings file (defaults to ~/.studysync/settings.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level for this run, e.g. `debug`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue whatever is stale and run the queue once.
    Sync,

    /// Print the engine status as JSON.
    Status,

    /// Clear the error state and sync again.
    Retry,

    /// Store an API token.
    Login {
        #[arg(env = ENV_API_TOKEN, hide_env_values = true)]
        token: String,
    },

    /// Forget the API token.
    Logout,

    /// Re-fetch specific subjects.
    Refresh {
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<i64>,
    },

    /// Items burned in the last 30 days.
    Burns,

    /// Keep running: sync on connectivity changes and on the hourly alarm.
    Daemon {
        /// Housekeeping period in seconds.
        #[arg(long, default_value_t = 60)]
        tick_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    let config = match &cli.config {
        Some(path) => config::load_config_from_path(path),
        None => config::load_config(),
    }
    .context("loading settings")?;
    let engine = build_engine(config)?;

    match cli.command {
        Command::Sync => {
            let outcome = engine
                .sync()
                .trigger(TriggerSource::User, Duration::ZERO)
                .await?;
            print_json(&outcome)
        }
        Command::Status => print_json(&engine.status()?),
        Command::Retry => print_json(&engine.sync().retry().await?),
        Command::Login { token } => {
            let state = engine.login(token.trim())?;
            info!(%state, "token stored");
            print_json(&state)
        }
        Command::Logout => print_json(&engine.logout()?),
        Command::Refresh { ids } => {
            engine.refresh_subjects(&ids)?;
            let outcome = engine
                .sync()
                .trigger(TriggerSource::User, Duration::ZERO)
                .await?;
            print_json(&outcome)
        }
        Command::Burns => print_json(&engine.recent_burns()?),
        Command::Daemon { tick_secs } => run_daemon(&engine, Duration::from_secs(tick_secs)).await,
    }
}

fn build_engine(config: SyncConfig) -> anyhow::Result<Engine> {
    let db = Arc::new(
        Database::open(&config.database_path)
            .with_context(|| format!("opening {}", config.database_path.display()))?,
    );
    let api = HttpApiClient::new(
        &config.api_base_url,
        config.request_timeout(),
        Arc::clone(&db),
    )?;
    let engine = EngineBuilder::new(config)
        .database(db)
        .api_client(Arc::new(api))
        .build()?;
    Ok(engine)
}

async fn run_daemon(engine: &Engine, tick: Duration) -> anyhow::Result<()> {
    let worker = engine.spawn_worker(WorkerSettings {
        tick,
        ..WorkerSettings::default()
    });
    info!(tick_secs = tick.as_secs(), "daemon running, ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    worker.shutdown_and_join().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn refresh_takes_comma_separated_ids() {
        let cli = Cli::try_parse_from(["studysync", "refresh", "3,5", "8"]).unwrap();
        match cli.command {
            Command::Refresh { ids } => assert_eq!(ids, vec![3, 5, 8]),
            _ => panic!("expected refresh"),
        }
    }

    #[test]
    fn global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from(["studysync", "status", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
