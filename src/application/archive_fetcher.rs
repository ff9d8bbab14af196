use std::io::Cursor;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::until_cancelled;
use crate::domain::{
    error::IngestionError,
    models::{base_name, CacheLayout, ExtractedFile, PeriodToken, Staging},
    ports::ObjectStore,
};
use crate::infrastructure::archive::{expand, DirWriter, MemoryWriter};

pub struct ArchiveFetcher<'a> {
    store: &'a dyn ObjectStore,
    cache: &'a CacheLayout,
}

impl<'a> ArchiveFetcher<'a> {
    pub fn new(store: &'a dyn ObjectStore, cache: &'a CacheLayout) -> Self {
        Self { store, cache }
    }

    /// Downloads and extracts every report key, in order. Fails on transport
    /// errors and unreadable containers; bad zip entries are skipped.
    pub async fn fetch(
        &self,
        token: &PeriodToken,
        report_keys: &[String],
        staging: Staging,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedFile>, IngestionError> {
        let extracted = match staging {
            Staging::LocalCache => self.fetch_to_cache(token, report_keys, cancel).await?,
            Staging::InMemory => self.fetch_in_memory(report_keys, cancel).await?,
        };
        info!(token = %token, reports = report_keys.len(), extracted = extracted.len(), "Fetched reports");
        Ok(extracted)
    }

    async fn fetch_to_cache(
        &self,
        token: &PeriodToken,
        report_keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedFile>, IngestionError> {
        let dir = self.cache.data_dir(token);
        tokio::fs::create_dir_all(&dir).await?;

        let mut extracted = Vec::new();
        for key in report_keys {
            let name = base_name(key);
            if name.is_empty() {
                warn!(key = %key, "Skipping report key without a file name");
                continue;
            }

            let archive_path = dir.join(name);
            until_cancelled(cancel, self.store.download_to(key, &archive_path))
                .await
                .map_err(|e| as_download_error(key, e))?;
            info!("📦 Saved archive: {}", archive_path.display());

            let source_key = key.clone();
            let target = dir.clone();
            let paths = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, IngestionError> {
                let file = std::fs::File::open(&archive_path)?;
                expand(&source_key, file, &mut DirWriter::new(target))
            })
            .await
            .map_err(|e| IngestionError::Io(std::io::Error::other(e)))??;

            extracted.extend(paths.into_iter().map(|path| ExtractedFile::on_disk(key, path)));
        }
        Ok(extracted)
    }

    async fn fetch_in_memory(
        &self,
        report_keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedFile>, IngestionError> {
        let mut extracted = Vec::new();
        for key in report_keys {
            let bytes = until_cancelled(cancel, self.store.get_bytes(key))
                .await
                .map_err(|e| as_download_error(key, e))?;

            let source_key = key.clone();
            let entries = tokio::task::spawn_blocking(move || expand(&source_key, Cursor::new(bytes), &mut MemoryWriter))
                .await
                .map_err(|e| IngestionError::Io(std::io::Error::other(e)))??;

            extracted.extend(entries.into_iter().map(|(name, body)| ExtractedFile::in_memory(key, &name, body)));
        }
        Ok(extracted)
    }
}

fn as_download_error(key: &str, e: IngestionError) -> IngestionError {
    match e {
        IngestionError::Cancelled | IngestionError::DownloadFailed { .. } => e,
        other => IngestionError::DownloadFailed { key: key.to_string(), reason: other.to_string() },
    }
}
