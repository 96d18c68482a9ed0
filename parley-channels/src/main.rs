//! Parley - Main entry point.

use anyhow::Result;
use clap::Parser;
use parley_common::logging::init_logging_with_exclusions;
use parley_common::{Config, EnvSource};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version)]
#[command(about = "Relay chat conversations to a language model.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.parley/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model provider key (echo, openai, openai-instruct, vllm)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model name
    #[arg(short, long)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_with(cli.config.as_deref(), &EnvSource)?;
    if let Some(provider) = cli.provider {
        config.provider.name = provider;
    }
    if let Some(model) = cli.model {
        config.provider.model = model;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Parley v{}", env!("CARGO_PKG_VERSION"));

    parley_channels::run(config).await
}
