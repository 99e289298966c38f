//! CLI module for modelmgr
//!
//! Provides the server entry point and operator commands.

pub mod reset_pending;
pub mod serve;
pub mod sync;

use clap::{Parser, Subcommand};

/// Model manager - Syncs a model catalog and distributes files to clients
#[derive(Parser, Debug)]
#[command(name = "modelmgr")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    MODELMGR_HOST                         Bind address (default: 0.0.0.0)
    MODELMGR_PORT                         Listen port (default: 8080)
    MODELMGR_DATABASE_URL                 Database URL (default: sqlite:modelmgr.db)
    MODELMGR_CLIENT_SECRET                Shared secret for client connections
    MODELMGR_CIVITAI_API_KEY              Bearer token for the remote catalog
    MODELMGR_CIVITAI_BASE_URL             Remote catalog base URL
    MODELMGR_MODEL_PATH                   Model root (default: ./data/downloads)
    MODELMGR_IMAGE_PATH                   Image root (default: ./data/images)
    MODELMGR_TRASH_DIR                    Trash root (default: user trash)
    MODELMGR_DOWNLOAD_STALL_TIMEOUT_SECS  Per-chunk stall deadline, 0 disables
    MODELMGR_SYNC_CONCURRENCY             Sync worker cap (default: 4)
    MODELMGR_LOG_LEVEL                    Log level (default: info)
    MODELMGR_LOG_DIR                      Daily rolling JSON log directory
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve(serve::ServeArgs),
    /// Sync the remote catalog once and exit
    Sync(sync::SyncArgs),
    /// Delete pending client file rows
    ResetPending(reset_pending::ResetPendingArgs),
}
