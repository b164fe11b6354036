//! blelink bridge library
//!
//! Components of the `blelink` binary: argument parsing, configuration loading and
//! the stdio transport that carries commands in and events out.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod stdio;

pub use cli::Cli;
pub use config::{CliConfig, LogConfig};
pub use error::{CliError, Result};
