use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::until_cancelled;
use crate::domain::{
    error::IngestionError,
    models::{base_name, ManifestKey},
    ports::ObjectStore,
};

/// Default suffix of the per-period manifest object. AWS names it
/// `<report-name>-Manifest.json`.
pub const DEFAULT_MANIFEST_NAME: &str = "Manifest.json";

pub struct ManifestLocator<'a> {
    store: &'a dyn ObjectStore,
    manifest_name: &'a str,
}

impl<'a> ManifestLocator<'a> {
    pub fn new(store: &'a dyn ObjectStore, manifest_name: &'a str) -> Self {
        Self { store, manifest_name }
    }

    /// Lists every key under `prefix`, following continuation tokens until
    /// the listing is exhausted.
    async fn list_all(&self, prefix: &str, cancel: &CancellationToken) -> Result<Vec<String>, IngestionError> {
        let mut keys = Vec::new();
        let mut continuation = None;
        let mut pages = 0usize;

        loop {
            let page = until_cancelled(cancel, self.store.list_page(prefix, continuation.take())).await?;
            pages += 1;
            debug!(page = pages, objects = page.keys.len(), "Listed object page");
            keys.extend(page.keys);

            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Manifests under `prefix`, newest period first. Returns only the newest
    /// unless `ingest_all` is set. An empty result means nothing to do.
    pub async fn locate(
        &self,
        prefix: &str,
        ingest_all: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ManifestKey>, IngestionError> {
        let keys = self.list_all(prefix, cancel).await.map_err(|e| match e {
            IngestionError::ListingFailed(_) | IngestionError::Cancelled => e,
            other => IngestionError::ListingFailed(other.to_string()),
        })?;

        let mut manifests: Vec<ManifestKey> = keys
            .into_iter()
            .filter(|key| base_name(key).ends_with(self.manifest_name))
            .map(ManifestKey::new)
            .inspect(|m| debug!(key = %m.key, token = %m.token, "Found manifest"))
            .collect();

        manifests.sort_by(|a, b| b.token.cmp(&a.token));

        if !ingest_all {
            manifests.truncate(1);
        }

        info!(selected = manifests.len(), ingest_all, "Selected manifests");
        Ok(manifests)
    }
}
