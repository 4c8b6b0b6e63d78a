//! repowatch entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load `repowatch.toml`, apply environment
//!    overrides and validate it.
//! 2. **Wire observability**: install `tracing-subscriber` with a JSON or
//!    pretty layer and, when configured, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: `GithubSource`, `TelegramNotifier`, the
//!    token vault and the tracking store restored from its snapshot, injected
//!    into `Monitor` and `Dispatcher`.
//! 4. **Run**: drive the `Scheduler` until Ctrl-C or SIGTERM, saving the
//!    tracking snapshot after every tick and once more on the way out.
//!
//! The remaining subcommands administer the persisted state offline.

mod commands;
mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use github::GithubSource;
use monitor::{Dispatcher, Monitor, Scheduler, TickReport};
use storage::{EncryptedFileVault, TrackingSnapshot, VaultKey};
use telegram::TelegramNotifier;
use tracing::{info, warn};
use tracking::{
    InMemoryTokenVault, PermissionValidator, RepositoryKey, SubscriberId, TokenVault,
    TrackingStore,
};

use crate::config::{AppConfig, StorageSection};

#[derive(Parser)]
#[command(name = "repowatch")]
#[command(version, about = "Watches GitHub repositories and posts updates to Telegram", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $REPOWATCH_CONFIG, then ./repowatch.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll tracked repositories and deliver notifications (default)
    Run,
    /// Register a tracking, e.g. `track -s 42 owner/name [releases,issues] > -1001234/7`
    Track {
        #[arg(short, long)]
        subscriber: i64,
        /// Skip the probe message that checks the bot can post to the destination
        #[arg(long)]
        no_check: bool,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        request: Vec<String>,
    },
    /// Remove a tracking, or one of its destinations
    Untrack {
        #[arg(short, long)]
        subscriber: i64,
        repository: String,
        /// `chat_id` or `chat_id/thread_id`; all destinations when omitted
        #[arg(short, long, allow_hyphen_values = true)]
        destination: Option<String>,
    },
    /// List trackings
    List {
        #[arg(short, long)]
        subscriber: Option<i64>,
    },
    /// Fetch repository metadata to check access
    Check {
        repository: String,
        /// Use this subscriber's stored token
        #[arg(short, long)]
        subscriber: Option<i64>,
    },
    /// Manage stored GitHub tokens
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Store or replace a subscriber's token
    Set {
        #[arg(short, long)]
        subscriber: i64,
        token: String,
    },
    /// Delete a subscriber's token
    Delete {
        #[arg(short, long)]
        subscriber: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let telemetry = telemetry::init(&config.telemetry)?;

    let result = execute(cli.command.unwrap_or(Command::Run), &config).await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "repowatch failed");
    }
    telemetry.shutdown();
    result
}

async fn execute(command: Command, config: &AppConfig) -> Result<()> {
    let snapshot = config.storage.trackings_path.as_path();
    let output = match command {
        Command::Run => return run(config).await,
        Command::Track {
            subscriber,
            no_check,
            request,
        } => {
            let validator: Box<dyn PermissionValidator> = if no_check {
                Box::new(commands::SkipPermissionCheck)
            } else {
                Box::new(TelegramNotifier::new(config.bot_token()?))
            };
            commands::track(
                snapshot,
                SubscriberId::new(subscriber),
                &request.join(" "),
                validator.as_ref(),
            )
            .await?
        }
        Command::Untrack {
            subscriber,
            repository,
            destination,
        } => {
            let destination = destination
                .as_deref()
                .map(tracking::parse_destination)
                .transpose()?;
            commands::untrack(
                snapshot,
                SubscriberId::new(subscriber),
                &RepositoryKey::parse(&repository)?,
                destination,
            )?
        }
        Command::List { subscriber } => commands::list(snapshot, subscriber.map(SubscriberId::new))?,
        Command::Check {
            repository,
            subscriber,
        } => {
            let source = GithubSource::new(config.github.clone())
                .context("Failed to build GitHub client")?;
            let vault = open_vault(&config.storage)?;
            commands::check(
                &source,
                vault.as_ref(),
                &RepositoryKey::parse(&repository)?,
                subscriber.map(SubscriberId::new),
            )
            .await?
        }
        Command::Token { action } => {
            if config.storage.vault_key.is_none() {
                bail!("Token commands need a persistent vault: set [storage].vault_key or REPOWATCH_VAULT_KEY");
            }
            let vault = open_vault(&config.storage)?;
            match action {
                TokenCommand::Set { subscriber, token } => {
                    commands::set_token(vault.as_ref(), SubscriberId::new(subscriber), &token).await?
                }
                TokenCommand::Delete { subscriber } => {
                    commands::delete_token(vault.as_ref(), SubscriberId::new(subscriber)).await?
                }
            }
        }
    };
    println!("{output}");
    Ok(())
}

fn open_vault(settings: &StorageSection) -> Result<Arc<dyn TokenVault>> {
    match settings.vault_key.as_deref() {
        Some(encoded) => {
            let key = VaultKey::from_base64(encoded).context("Invalid vault key")?;
            let vault = EncryptedFileVault::open(&settings.vault_path, &key)
                .context("Failed to open credential vault")?;
            Ok(Arc::new(vault))
        }
        None => {
            warn!("No vault key configured; subscriber tokens are kept in memory only");
            Ok(Arc::new(InMemoryTokenVault::new()))
        }
    }
}

async fn run(config: &AppConfig) -> Result<()> {
    let bot_token = config.bot_token()?;
    let snapshot_path = config.storage.trackings_path.clone();

    let trackings = TrackingSnapshot::load(&snapshot_path).context("Failed to load tracking snapshot")?;
    let store = Arc::new(TrackingStore::from_trackings(trackings));
    info!(
        trackings = store.len(),
        repositories = store.repositories().len(),
        "Tracking store restored"
    );

    let vault = open_vault(&config.storage)?;
    let source = Arc::new(
        GithubSource::new(config.github.clone()).context("Failed to build GitHub client")?,
    );
    let notifier = Arc::new(TelegramNotifier::new(bot_token));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), notifier, &config.monitor));
    let monitor = Arc::new(Monitor::new(
        store.clone(),
        vault,
        source,
        dispatcher,
        config.monitor.clone(),
    ));

    let ticks = Scheduler::new(monitor)
        .run_until(shutdown_signal(), |report: &TickReport| {
            persist(&snapshot_path, &store, report)
        })
        .await;

    TrackingSnapshot::save(&snapshot_path, &store.snapshot())
        .context("Failed to save tracking snapshot on shutdown")?;
    info!(ticks, "repowatch stopped");
    Ok(())
}

fn persist(path: &Path, store: &TrackingStore, report: &TickReport) {
    if let Err(e) = TrackingSnapshot::save(path, &store.snapshot()) {
        warn!(tick_id = %report.tick_id, error = %e, "Failed to save tracking snapshot");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, finishing current tick"),
        _ = terminate => info!("SIGTERM received, finishing current tick"),
    }
}
