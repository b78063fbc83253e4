use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::orchestrator::run_scan;
use crate::pipeline::ScanContext;
use crate::prediction_tools::xgboost_model::XgbBooster;

mod analysis;
mod cli;
mod config;
mod data_handling;
mod errors;
mod helper_functions;
mod models;
mod orchestrator;
mod pipeline;
mod prediction_tools;
mod schema;

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config();
    config.validate()?;

    let run_dir = config.run_dir();
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("creating output directory {}", run_dir.display()))?;
    let config_path = config.write_json(&run_dir)?;
    info!("Starting microRNA variant scan; configuration in {}", config_path.display());
    info!("{:?}", config);

    let model_path = config.references.model.clone();
    let model = XgbBooster::load(&model_path)
        .with_context(|| format!("loading model {}", model_path.display()))?;
    let ctx = ScanContext::load(config, Box::new(model)).context("loading reference tables")?;

    let summary = run_scan(&ctx).context("running chunk pool")?;
    info!(
        "Chunk manifest written to {}, invalid rows to {}",
        summary.manifest.display(),
        summary.invalid_rows.display()
    );
    Ok(())
}
