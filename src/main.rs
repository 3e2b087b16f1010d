//! infer-loadgen - Load generator for networked inference services

use anyhow::{Context, Result};
use clap::Parser;

use loadgen_core::{ModelDescriptor, ModelParser};

mod cli;
mod report;
mod runner;

use cli::Commands;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(model = %args.model.display(), "infer-loadgen starting");
            let report = runner::run(&args)?;
            if args.json {
                report.print_json()?;
            } else {
                report.print_table()?;
            }
        }
        Commands::Validate { config, model } => {
            let config = cli::read_config(config.as_deref())?;
            config.validate().context("invalid load configuration")?;
            let descriptor = ModelDescriptor::from_json_file(&model)
                .with_context(|| format!("invalid model {}", model.display()))?;
            println!(
                "OK: model '{}' with {} inputs, batch size {}, {} worker threads max",
                descriptor.model_name(),
                descriptor.inputs().len(),
                config.batch_size,
                config.max_threads
            );
        }
    }

    Ok(())
}
