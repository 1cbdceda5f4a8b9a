//! boat-count CLI - turn tiled detector outputs into boat counts.

use anyhow::{Context, Result};
use clap::Parser;

use boat_count::cli::{get_log_level, Cli, Command, OutputFormat};
use boat_count::compare::compare_dirs;
use boat_count::config::Config;
use boat_count::pipeline::CountPipeline;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = get_log_level(cli.verbose);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or_else(|_| "info".parse().unwrap())),
        )
        .init();

    let config = Config::load(&cli.config)?;
    tracing::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Classify { source } => {
            let pipeline = CountPipeline::new(config);
            pipeline.run(source.as_deref())?;
        }
        Command::Compare { truth, format } => {
            run_compare(&config, truth.as_deref(), format)?;
        }
        Command::Auto => {
            let tasks = config.tasks.clone();
            if tasks.classify {
                tracing::info!("Running task: classify");
                let pipeline = CountPipeline::new(config.clone());
                pipeline.run(None)?;
            }
            if tasks.compare {
                tracing::info!("Running task: compare");
                run_compare(&config, None, OutputFormat::Text)?;
            }
            if !tasks.classify && !tasks.compare {
                tracing::warn!("No tasks enabled in configuration");
            }
        }
    }

    Ok(())
}

fn run_compare(
    config: &Config,
    truth: Option<&std::path::Path>,
    format: OutputFormat,
) -> Result<()> {
    let truth_dir = truth
        .or(config.truth_dir.as_deref())
        .context("No ground-truth directory given (set truth_dir or pass --truth)")?;
    let comparison = compare_dirs(config, &config.labels_dir, truth_dir)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&comparison)?),
        OutputFormat::Text => println!("{}", comparison),
    }
    Ok(())
}
