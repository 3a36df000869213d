use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripdata_sync::{Config, Error, Orchestrator, S3Repository};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination bucket
    #[arg(short, long)]
    bucket: Option<String>,

    /// Workers per phase
    #[arg(short, long)]
    workers: Option<usize>,

    /// Local staging directory
    #[arg(short, long)]
    download_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e.downcast_ref::<Error>().map_or(1, Error::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(bucket) = args.bucket {
        config.destination.bucket = bucket;
    }
    if let Some(workers) = args.workers {
        config.transfer.workers = workers;
    }
    if let Some(dir) = args.download_dir {
        config.staging.download_dir = dir;
    }
    config.validate()?;

    let repository = S3Repository::connect(&config)
        .await
        .map_err(Error::from)?;
    let orchestrator = Orchestrator::new(config, Arc::new(repository))?;

    let report = orchestrator.run().await?;
    let summary = serde_json::to_string_pretty(&report).context("failed to render run report")?;
    println!("{}", summary);
    Ok(())
}
