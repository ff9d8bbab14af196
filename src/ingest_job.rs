use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    application::{
        credential_resolver::CredentialResolver,
        ingestion_service::IngestionService,
        sinks::{PreviewSampler, StoreLoader},
    },
    config::Config,
    domain::{error::IngestionError, models::RunSummary, ports::ReportSink},
    infrastructure::{aws_auth::AwsAuthBackend, duckdb::store::DuckDbStore, s3_adapter::S3Connector},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Download, extract and load every report into DuckDB.
    Ingest,
    /// Download and print the first lines of every report.
    Preview,
}

impl FromStr for Mode {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(Mode::Ingest),
            "preview" => Ok(Mode::Preview),
            other => Err(IngestionError::Config(format!("unknown mode {:?}, expected ingest or preview", other))),
        }
    }
}

/// Wires the production adapters around one [`IngestionService`].
pub struct IngestJob {
    service: IngestionService,
}

impl IngestJob {
    pub fn from_config(config: &Config, mode: Mode) -> Result<Self, IngestionError> {
        debug!("Initializing ingest job in {:?} mode", mode);

        let resolver = Arc::new(CredentialResolver::new(Arc::new(AwsAuthBackend::new())));
        let connector = Arc::new(
            S3Connector::new(config.cur.bucket.clone(), config.aws.endpoint.clone())
                .with_bucket_region(config.bucket_region()),
        );

        let sink: Arc<dyn ReportSink> = match mode {
            Mode::Ingest => {
                info!("Using DuckDB database: {}", config.storage.database_path.display());
                let store = DuckDbStore::open(&config.storage.database_path)?;
                Arc::new(StoreLoader::new(Arc::new(store)))
            }
            Mode::Preview => Arc::new(PreviewSampler::new(config.preview.lines, config.report_format())),
        };

        let mut settings = config.pipeline_settings();
        if mode == Mode::Preview {
            settings.prefix = config.preview_prefix();
            debug!(prefix = %settings.prefix, "Preview listing prefix");
        }

        let service = IngestionService::new(resolver, connector, sink, settings);
        Ok(Self { service })
    }

    /// Runs once. Ctrl-C cancels whatever network call is in flight.
    pub async fn run(&self) -> Result<RunSummary, IngestionError> {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                on_signal.cancel();
            }
        });

        let result = self.service.run(&cancel).await;
        watcher.abort();
        result
    }
}
