//! Command-line interface for boat-count.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// boat-count - Count boats in satellite imagery from tiled detector outputs
#[derive(Parser, Debug)]
#[command(
    name = "boat-count",
    about = "Aggregate, deduplicate and validate boat detections",
    version,
    author
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yml", value_name = "PATH")]
    pub config: PathBuf,

    /// Verbose logging (can be repeated: -v, -vv, -vvv)
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Aggregate and cluster detector label files into boat counts
    Classify {
        /// Directory of label directories, overriding the configured one
        #[arg(long, value_name = "DIR")]
        source: Option<PathBuf>,
    },
    /// Match detections against ground-truth labels and report metrics
    Compare {
        /// Ground-truth directory, overriding the configured one
        #[arg(long, value_name = "DIR")]
        truth: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: OutputFormat,
    },
    /// Run every stage enabled under `tasks` in the configuration
    Auto,
}

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            _ => Err(format!("Unknown format: {}. Use 'json' or 'text'", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Text => write!(f, "text"),
        }
    }
}

/// Get tracing level from verbosity
pub fn get_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
