//! Command-line interface definitions and parsing

use clap::Parser;

/// Bridge a host process to the local Bluetooth Low Energy stack.
///
/// Reads one JSON command per line on stdin and writes one encoded event per line
/// on stdout. Logs go to stderr. Closing stdin de-initializes the engine and exits.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Host adapter to use, overriding the configuration file
    #[arg(short, long)]
    pub adapter_index: Option<usize>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}
