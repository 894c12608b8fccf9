#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use transitlake::config::load_config;
use transitlake::pipeline::{run_bronze, run_silver};
use transitlake::store::ParquetStore;
use transitlake::transform::ExtractionStamp;

#[derive(Debug, Parser)]
#[command(name = "transitlake", about = "Bronze/silver ingestion pipeline for transit API feeds")]
struct Cli {
    /// Path to the pipeline configuration file.
    #[arg(long, default_value = "pipeline.json")]
    config: PathBuf,

    /// Which pipeline stage to run.
    #[arg(long, value_enum, default_value_t = Stage::All)]
    stage: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    Bronze,
    Silver,
    All,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "pipeline run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli.config)?;
    let store = ParquetStore::new(&config.lake.root);

    if matches!(cli.stage, Stage::Bronze | Stage::All) {
        let client = transitlake::client::ApiClient::new(&config.api.base_url, &config.api.api_key);
        run_bronze(&client, &store, &ExtractionStamp::now())?;
    }
    if matches!(cli.stage, Stage::Silver | Stage::All) {
        run_silver(&store)?;
    }
    Ok(())
}
