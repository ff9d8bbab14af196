use std::path::PathBuf;

use cur_ingest::{
    config::{Config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH},
    ingest_job::{IngestJob, Mode},
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cur_ingest=debug".parse()?)
                .add_directive("aws_config=warn".parse()?)
                .add_directive("aws_sdk_s3=warn".parse()?),
        )
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let mode = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Mode>()?,
        None => Mode::Ingest,
    };

    let config_path =
        PathBuf::from(std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()));
    info!("Starting CUR ingest ({:?}) with config {}", mode, config_path.display());

    let config = Config::load_file(&config_path)?;
    debug!("Cache root: {}", config.storage.cache_path.display());

    let job = IngestJob::from_config(&config, mode)?;
    let summary = job.run().await?;

    info!(
        "Run {} finished: {} manifest(s) processed, {} file(s) loaded, {} failed",
        summary.run_id,
        summary.manifests_processed(),
        summary.files_loaded(),
        summary.files_failed()
    );
    Ok(())
}
