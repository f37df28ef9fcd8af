//! debug-bridge - drive a debug session from the command line
//!
//! Talks DAP to native debug adapters and bridges Node.js / Chrome
//! inspector sessions (CDP) into the same session flow.

use std::path::PathBuf;

use clap::Parser;
use debug_bridge::common::{config::Config, logging, paths};
use debug_bridge::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "debug-bridge", about = "DAP client and CDP bridge for scripted debugging")]
#[command(version, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to a file (default: the platform log directory)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<Option<PathBuf>>,

    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file = cli.log_file.clone().map(|path| {
        path.or_else(|| paths::log_dir().map(|dir| dir.join("debug-bridge.log")))
            .unwrap_or_else(|| PathBuf::from("debug-bridge.log"))
    });

    let _guard = match &log_file {
        Some(path) => match logging::init_with_file(cli.verbose, path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: cannot open log file {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => {
            logging::init_cli(cli.verbose);
            None
        }
    };

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, &config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::debug!(error = ?e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
