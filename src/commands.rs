//! CLI command definitions
//!
//! Defines the clap commands for the electron-connect CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the application and supervise it, reading control lines from stdin
    ///
    /// Control lines: restart [args...], reload [ids...],
    /// broadcast <type> [json], send <id> <type> [json], status, stop
    Serve {
        /// Port to listen on for window connections
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the GUI host executable
        #[arg(long)]
        electron: Option<PathBuf>,

        /// Application path passed as the last argument
        #[arg(long)]
        path: Option<PathBuf>,

        /// Stop once the last window closes
        #[arg(long)]
        stop_on_close: bool,

        /// Resolve the executable from PATH instead of node_modules
        #[arg(long)]
        use_global_electron: bool,

        /// Verbose logging
        #[arg(long, short, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Arguments passed to the application
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Print the configuration file location
    ConfigPath,
}
