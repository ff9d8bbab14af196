use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{
    archive_fetcher::ArchiveFetcher, manifest_locator::ManifestLocator, manifest_parser::ManifestParser,
};
use crate::domain::{
    error::IngestionError,
    models::{
        AuthMethod, CacheLayout, FileOutcome, FileStatus, IngestionRun, ManifestKey, PipelineStage, RunSummary,
        Session, Staging,
    },
    ports::{ObjectStore, ObjectStoreConnector, ReportSink, SessionResolver},
};

/// Sessions closer than this to expiry are re-resolved before the next manifest.
const SESSION_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub region: String,
    pub auth_methods: Vec<AuthMethod>,
    pub prefix: String,
    pub manifest_name: String,
    pub ingest_all: bool,
    pub cache: CacheLayout,
}

pub struct IngestionService {
    resolver: Arc<dyn SessionResolver>,
    connector: Arc<dyn ObjectStoreConnector>,
    sink: Arc<dyn ReportSink>,
    settings: PipelineSettings,
}

impl IngestionService {
    pub fn new(
        resolver: Arc<dyn SessionResolver>,
        connector: Arc<dyn ObjectStoreConnector>,
        sink: Arc<dyn ReportSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self { resolver, connector, sink, settings }
    }

    /// Runs the pipeline once. Only authentication, listing and cancellation
    /// abort the run; every other failure is recorded in the summary, which
    /// is logged on every exit path.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, IngestionError> {
        let mut summary = RunSummary {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            stage: PipelineStage::Idle,
            manifests_found: 0,
            runs: Vec::new(),
        };
        info!(run_id = %summary.run_id, sink = self.sink.name(), "🚀 Starting CUR ingest pipeline");

        let result = self.drive(&mut summary, cancel).await;
        match &result {
            Ok(()) => {
                enter(&mut summary, PipelineStage::Done);
                log_summary(&summary);
            }
            Err(e) => {
                error!(run_id = %summary.run_id, stage = %summary.stage, "❌ CUR ingest aborted: {}", e);
                log_summary(&summary);
            }
        }
        result.map(|()| summary)
    }

    async fn drive(&self, summary: &mut RunSummary, cancel: &CancellationToken) -> Result<(), IngestionError> {
        enter(summary, PipelineStage::Authenticating);
        let (mut session, mut store) = self.authenticate(cancel).await?;

        enter(summary, PipelineStage::Locating);
        let manifests = ManifestLocator::new(store.as_ref(), &self.settings.manifest_name)
            .locate(&self.settings.prefix, self.settings.ingest_all, cancel)
            .await?;
        summary.manifests_found = manifests.len();

        if manifests.is_empty() {
            warn!(prefix = %self.settings.prefix, "⚠️ No CUR manifests found");
            return Ok(());
        }

        for manifest in manifests {
            if session.expires_within(Utc::now(), chrono::Duration::seconds(SESSION_REFRESH_MARGIN_SECS)) {
                info!(expires_at = ?session.expires_at(), "Session about to expire, re-resolving credentials");
                enter(summary, PipelineStage::Authenticating);
                (session, store) = self.authenticate(cancel).await?;
            }
            self.process_manifest(summary, store.as_ref(), manifest, cancel).await?;
        }
        Ok(())
    }

    async fn authenticate(&self, cancel: &CancellationToken) -> Result<(Session, Arc<dyn ObjectStore>), IngestionError> {
        let resolved = self
            .resolver
            .resolve(&self.settings.auth_methods, &self.settings.region, cancel)
            .await?;
        for failure in &resolved.failures {
            debug!(index = failure.index, kind = %failure.kind, "Skipped auth method: {}", failure.diagnostic);
        }

        let store = self.connector.connect(&resolved.session).await?;
        Ok((resolved.session, store))
    }

    /// Returns an error only on cancellation; anything else is recorded
    /// against this manifest's run.
    async fn process_manifest(
        &self,
        summary: &mut RunSummary,
        store: &dyn ObjectStore,
        manifest: ManifestKey,
        cancel: &CancellationToken,
    ) -> Result<(), IngestionError> {
        info!("🔍 Processing manifest: {}", manifest.key);
        let mut run = IngestionRun::new(manifest);

        enter(summary, PipelineStage::Parsing);
        let manifest_cache = (self.sink.staging() == Staging::LocalCache).then_some(&self.settings.cache);
        let parsed = ManifestParser::new(store, manifest_cache).parse(&run.manifest, cancel).await;
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(IngestionError::Cancelled) => return Err(IngestionError::Cancelled),
            Err(e) => {
                error!(manifest = %run.manifest.key, "❌ Could not parse manifest: {}", e);
                run.error = Some(e.to_string());
                summary.runs.push(run);
                return Ok(());
            }
        };
        run.report_keys = parsed.report_keys.len();

        enter(summary, PipelineStage::Fetching);
        let files = ArchiveFetcher::new(store, &self.settings.cache)
            .fetch(&run.manifest.token, &parsed.report_keys, self.sink.staging(), cancel)
            .await;
        let files = match files {
            Ok(files) => files,
            Err(IngestionError::Cancelled) => return Err(IngestionError::Cancelled),
            Err(e) => {
                error!(manifest = %run.manifest.key, "❌ Error downloading or extracting reports: {}", e);
                run.error = Some(e.to_string());
                summary.runs.push(run);
                return Ok(());
            }
        };

        enter(summary, PipelineStage::Loading);
        for file in files {
            if cancel.is_cancelled() {
                return Err(IngestionError::Cancelled);
            }
            let status = match self.sink.accept(&file).await {
                Ok(rows) => FileStatus::Loaded { rows },
                Err(e) => {
                    error!(table = %file.table_name, report = %file.source_key, "❌ Failed loading file: {}", e);
                    FileStatus::Failed { reason: e.to_string() }
                }
            };
            run.files.push(FileOutcome { table_name: file.table_name, source_key: file.source_key, status });
        }

        info!(
            manifest = %run.manifest.key,
            extracted = run.files.len(),
            loaded = run.loaded(),
            failed = run.failed(),
            "📁 Finished manifest"
        );
        summary.runs.push(run);
        Ok(())
    }
}

fn enter(summary: &mut RunSummary, stage: PipelineStage) {
    debug!(run_id = %summary.run_id, from = %summary.stage, to = %stage, "Pipeline stage");
    summary.stage = stage;
}

fn log_summary(summary: &RunSummary) {
    info!(
        run_id = %summary.run_id,
        stage = %summary.stage,
        manifests_found = summary.manifests_found,
        manifests_processed = summary.manifests_processed(),
        manifests_failed = summary.manifests_failed(),
        files_extracted = summary.files_extracted(),
        files_loaded = summary.files_loaded(),
        files_failed = summary.files_failed(),
        elapsed_ms = (Utc::now() - summary.started_at).num_milliseconds(),
        "✅ CUR ingestion summary"
    );
}
