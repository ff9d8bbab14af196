use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{
    error::IngestionError,
    models::{ListPage, Session},
    ports::{ObjectStore, ObjectStoreConnector},
};

/// Object store held in memory. Keys list in lexicographic order, like S3,
/// and pages are cut at `page_size` with the last key as continuation token.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    page_size: usize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self { objects: Arc::new(RwLock::new(BTreeMap::new())), page_size: 1000 }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn put(&self, key: &str, body: Vec<u8>) {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), body);
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner()).get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage, IngestionError> {
        let objects = self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut matching = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| continuation.as_deref().map_or(true, |after| key.as_str() > after));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next_token = match matching.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };
        Ok(ListPage { keys, next_token })
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IngestionError> {
        self.get(key).ok_or_else(|| IngestionError::DownloadFailed {
            key: key.to_string(),
            reason: "no such key".to_string(),
        })
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64, IngestionError> {
        let body = self.get_bytes(key).await?;
        tokio::fs::write(dest, &body).await?;
        debug!(key, dest = %dest.display(), bytes = body.len(), "Copied in-memory object");
        Ok(body.len() as u64)
    }
}

#[async_trait]
impl ObjectStoreConnector for InMemoryObjectStore {
    async fn connect(&self, _session: &Session) -> Result<Arc<dyn ObjectStore>, IngestionError> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_follow_continuation_tokens() {
        let store = InMemoryObjectStore::new().with_page_size(2);
        for key in ["p/a", "p/b", "p/c", "q/d"] {
            store.put(key, Vec::new());
        }

        let first = store.list_page("p/", None).await.unwrap();
        assert_eq!(first.keys, vec!["p/a", "p/b"]);
        assert_eq!(first.next_token.as_deref(), Some("p/b"));

        let second = store.list_page("p/", first.next_token).await.unwrap();
        assert_eq!(second.keys, vec!["p/c"]);
        assert!(second.next_token.is_none());
    }
}
