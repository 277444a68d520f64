//! electron-connect - development supervisor for a desktop GUI application
//!
//! Launches the application, keeps a message channel to each of its windows,
//! and restarts or reloads them when told to on stdin.

use clap::Parser;
use electron_connect::cli;
use electron_connect::commands::Commands;

#[derive(Parser)]
#[command(name = "electron-connect", about = "Live-reload supervisor for GUI app development")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
