use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::compress::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};
use crate::download::http::DEFAULT_MAX_PHOTO_BYTES;
use crate::sync::DEFAULT_COOLDOWN_SECS;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "photo-sync",
    version,
    about = "Keep a local copy of a fixed set of remote photos"
)]
pub struct Cli {
    /// Log level (RUST_LOG overrides this)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sync daemon
    Sync(SyncArgs),
    /// Show last sync time and stored photo counts
    Status(StoreArgs),
    /// Delete the state database
    ResetState(ResetStateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// SQLite database holding sync state and photo content
    #[arg(long, env = "PHOTO_SYNC_DATABASE", default_value = "~/.photo-sync/state.db")]
    pub database: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// JSON manifest listing the photos to sync: [{"uid": "...", "url": "..."}]
    #[arg(short = 'p', long)]
    pub photos: PathBuf,

    /// Minimum seconds between the start of two sync cycles
    #[arg(long, default_value_t = DEFAULT_COOLDOWN_SECS)]
    pub cooldown_secs: f64,

    /// JPEG quality of the compressed variant
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Longest edge of the compressed variant, in pixels
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    pub max_dimension: u32,

    /// Abort downloads larger than this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_PHOTO_BYTES)]
    pub max_photo_bytes: u64,

    /// Also treat every N seconds as an activation
    #[arg(long, conflicts_with = "once")]
    pub watch_with_interval: Option<u64>,

    /// Activate once, wait for the cycle to finish, then exit
    #[arg(long)]
    pub once: bool,

    /// Send sd_notify READY/STATUS/STOPPING messages
    #[arg(long)]
    pub notify_systemd: bool,
}

#[derive(Args, Debug)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}
