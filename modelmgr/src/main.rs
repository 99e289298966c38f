//! Model manager server entry point

use clap::Parser;
use modelmgr::cli::{Cli, Commands};
use modelmgr::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let result = match cli.command {
        Some(Commands::Serve(args)) => modelmgr::cli::serve::execute(&args).await,
        Some(Commands::Sync(args)) => modelmgr::cli::sync::execute(&args).await,
        Some(Commands::ResetPending(args)) => modelmgr::cli::reset_pending::execute(&args).await,
        None => modelmgr::cli::serve::execute(&modelmgr::cli::serve::ServeArgs::default()).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
