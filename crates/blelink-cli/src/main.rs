//! blelink - stdio bridge to the local BLE stack

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blelink_cli::{app, cli::Cli, config::CliConfig, config::LogConfig, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = load_configuration(&cli)?;
    if let Some(index) = cli.adapter_index {
        config.backend.adapter_index = index;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Initialize logging
    setup_logging(cli.verbose, &config.log);

    if let Err(e) = app::run(config).await {
        error!("Bridge failed: {}", e);
        std::process::exit(1);
    }

    info!("blelink exited successfully");
    Ok(())
}

/// Setup logging on stderr; stdout carries the event stream
fn setup_logging(verbose: bool, log: &LogConfig) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(log.ansi)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    match &cli.config {
        Some(config_path) => CliConfig::load_from_file(config_path),
        None => Ok(CliConfig::default()),
    }
}
