//! netchat CLI entry point

use clap::Parser;
use tracing::{error, info};

use netchat_cli::{cli::Cli, commands::CommandDispatcher, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Execute the command
    if let Err(e) = CommandDispatcher::execute(cli).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("netchat exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
///
/// Logs go to stderr so they never interleave with the chat on stdout.
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
