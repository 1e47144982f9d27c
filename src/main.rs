//! photo-sync: keeps a local copy of a fixed set of remote photos.
//!
//! Every "became active" event (startup, SIGHUP, or a watch-interval tick)
//! asks the sync controller for a cycle. The controller runs at most one
//! cycle per cooldown window, downloads the photos one at a time and stores
//! each original plus a JPEG-compressed variant in a local SQLite database.

#![warn(clippy::all)]

mod activation;
mod cli;
mod clock;
mod compress;
mod config;
mod download;
mod shutdown;
mod store;
mod sync;
mod systemd;
mod types;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use activation::ActivationBus;
use cli::Command;
use store::SqliteStore;
use sync::{Collaborators, SyncController, SyncStatus};

/// Run the status command.
async fn run_status(args: cli::StoreArgs) -> anyhow::Result<()> {
    let db_path = config::expand_tilde(&args.database);

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let store = SqliteStore::open(&db_path).await?;
    let summary = store.summary()?;

    println!("State Database: {}", db_path.display());
    println!();
    match &summary.last_sync_started {
        Some(started) => println!(
            "Last sync started: {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Last sync started: never"),
    }
    println!();
    println!("Photos:");
    println!("  Original:   {}", summary.raw_photos);
    println!("  Compressed: {}", summary.compressed_photos);

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let db_path = config::expand_tilde(&args.store.database);

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the state database and every stored photo at:");
        println!("  {}", db_path.display());
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    std::fs::remove_file(&db_path)?;
    println!("State database deleted.");

    // WAL side files
    let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
    let _ = std::fs::remove_file(db_path.with_extension("db-shm"));

    Ok(())
}

/// Run the sync daemon until shutdown, or for one cycle with `--once`.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_args(args)?;
    let store = Arc::new(SqliteStore::open(&config.database).await?);
    let downloader = download::HttpDownloader::new(
        tokio::runtime::Handle::current(),
        config.max_photo_bytes,
    )?;
    let collaborators = Collaborators {
        clock: Arc::new(clock::SystemClock),
        last_sync: store.clone(),
        content: store.clone(),
        compressor: Arc::new(compress::JpegCompressor::new(
            config.jpeg_quality,
            config.max_dimension,
        )),
        downloader: Arc::new(downloader),
    };

    let bus = Arc::new(ActivationBus::new());
    let controller =
        SyncController::new(config.photos, collaborators, bus.clone(), config.cooldown_secs);
    tracing::info!(
        photos = controller.photos().len(),
        cooldown_secs = config.cooldown_secs,
        database = %config.database.display(),
        "Starting photo-sync"
    );

    let notifier = systemd::SystemdNotifier::new(config.notify_systemd);
    let mut status_rx = controller.watch_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            notifier.notify_sync_status(status);
        }
    });

    let shutdown_token = shutdown::install_signal_handler()?;
    notifier.notify_ready();

    if config.once {
        let mut idle_rx = controller.watch_status();
        bus.fire();
        tokio::select! {
            _ = idle_rx.wait_for(|status| *status == SyncStatus::Idle) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown requested before sync finished");
            }
        }
    } else {
        let sighup = activation::spawn_sighup_activation(bus.clone(), shutdown_token.clone())?;
        bus.fire();

        match config.watch_with_interval {
            Some(interval) => loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        tracing::debug!("Watch interval elapsed, activating");
                        bus.fire();
                    }
                    _ = shutdown_token.cancelled() => break,
                }
            },
            None => shutdown_token.cancelled().await,
        }

        sighup.await.ok();
    }

    notifier.notify_stopping();
    controller.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
    }
}
