use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::until_cancelled;
use crate::domain::{
    error::IngestionError,
    models::{CacheLayout, Manifest, ManifestKey},
    ports::ObjectStore,
};

pub struct ManifestParser<'a> {
    store: &'a dyn ObjectStore,
    cache: Option<&'a CacheLayout>,
}

impl<'a> ManifestParser<'a> {
    /// With `cache` unset nothing is written locally.
    pub fn new(store: &'a dyn ObjectStore, cache: Option<&'a CacheLayout>) -> Self {
        Self { store, cache }
    }

    /// Fetches the manifest, overwrites its cached copy, then parses it. The
    /// copy is written before parsing so a malformed manifest stays inspectable.
    pub async fn parse(&self, manifest: &ManifestKey, cancel: &CancellationToken) -> Result<Manifest, IngestionError> {
        debug!(key = %manifest.key, "Downloading manifest");
        let raw = until_cancelled(cancel, self.store.get_bytes(&manifest.key))
            .await
            .map_err(|e| match e {
                IngestionError::Cancelled | IngestionError::ManifestFetchFailed { .. } => e,
                other => IngestionError::ManifestFetchFailed { key: manifest.key.clone(), reason: other.to_string() },
            })?;

        if let Some(cache) = self.cache {
            let cache_path = cache.manifest_path(&manifest.token);
            if let Err(e) = write_cache(&cache_path, &raw).await {
                warn!(path = %cache_path.display(), "Failed to cache manifest: {}", e);
            } else {
                debug!(path = %cache_path.display(), bytes = raw.len(), "Cached manifest");
            }
        }

        let parsed: Manifest = serde_json::from_slice(&raw).map_err(|e| IngestionError::ManifestParseFailed {
            key: manifest.key.clone(),
            reason: e.to_string(),
        })?;

        info!(key = %manifest.key, report_keys = parsed.report_keys.len(), "Parsed manifest");
        Ok(parsed)
    }
}

async fn write_cache(path: &std::path::Path, raw: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, raw).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::models::PeriodToken;
    use crate::infrastructure::in_mem_store::InMemoryObjectStore;

    const KEY: &str = "cur/report/20240101-20240201/20240102T000000Z/Manifest.json";

    #[tokio::test]
    async fn parses_report_keys_and_caches_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheLayout::new(dir.path());
        let store = InMemoryObjectStore::new();
        let body = br#"{"reportKeys":["a/report-1.csv.gz","a/report-2.zip"],"compression":"GZIP"}"#;
        store.put(KEY, body.to_vec());

        let manifest = ManifestParser::new(&store, Some(&cache))
            .parse(&ManifestKey::new(KEY), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(manifest.report_keys, vec!["a/report-1.csv.gz", "a/report-2.zip"]);
        let cached = std::fs::read(dir.path().join("manifests/20240102T000000Z.json")).unwrap();
        assert_eq!(cached, body);
    }

    #[tokio::test]
    async fn malformed_manifest_is_a_parse_failure_but_still_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheLayout::new(dir.path());
        let store = InMemoryObjectStore::new();
        store.put(KEY, b"{\"reportKeys\": [".to_vec());

        let err = ManifestParser::new(&store, Some(&cache))
            .parse(&ManifestKey::new(KEY), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::ManifestParseFailed { .. }));
        assert!(cache.manifest_path(&PeriodToken::Stamp("20240102T000000Z".into())).exists());
    }

    #[tokio::test]
    async fn parses_without_a_cache() {
        let store = InMemoryObjectStore::new();
        store.put(KEY, br#"{"reportKeys":["a.csv.gz"]}"#.to_vec());

        let manifest =
            ManifestParser::new(&store, None).parse(&ManifestKey::new(KEY), &CancellationToken::new()).await.unwrap();

        assert_eq!(manifest.report_keys, vec!["a.csv.gz"]);
    }

    #[tokio::test]
    async fn missing_object_is_a_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheLayout::new(dir.path());
        let store = InMemoryObjectStore::new();

        let err = ManifestParser::new(&store, Some(&cache))
            .parse(&ManifestKey::new(KEY), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::ManifestFetchFailed { ref key, .. } if key == KEY));
    }

    #[tokio::test]
    async fn rerun_overwrites_the_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheLayout::new(dir.path());
        let store = InMemoryObjectStore::new();
        let parser = ManifestParser::new(&store, Some(&cache));
        let key = ManifestKey::new(KEY);

        store.put(KEY, br#"{"reportKeys":["old.csv.gz"]}"#.to_vec());
        parser.parse(&key, &CancellationToken::new()).await.unwrap();
        store.put(KEY, br#"{"reportKeys":["new.csv.gz"]}"#.to_vec());
        parser.parse(&key, &CancellationToken::new()).await.unwrap();

        let cached = std::fs::read_to_string(cache.manifest_path(&key.token)).unwrap();
        assert!(cached.contains("new.csv.gz"));
    }
}
