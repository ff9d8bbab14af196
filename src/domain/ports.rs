use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    error::IngestionError,
    models::{AuthMethod, ExtractedFile, ListPage, ResolvedSession, Session, Staging},
};

/// Builds and validates a session for a single auth method.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn open_session(&self, index: usize, method: &AuthMethod, region: &str) -> Result<Session, IngestionError>;
    async fn validate(&self, session: &Session) -> Result<(), IngestionError>;
}

/// Turns an ordered credential chain into one usable session.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(
        &self,
        methods: &[AuthMethod],
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSession, IngestionError>;
}

/// Read-only access to the bucket holding the reports.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage, IngestionError>;
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IngestionError>;
    /// Streams the object into `dest`, returning the number of bytes written.
    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64, IngestionError>;
}

#[async_trait]
pub trait ObjectStoreConnector: Send + Sync {
    async fn connect(&self, session: &Session) -> Result<Arc<dyn ObjectStore>, IngestionError>;
}

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create or replace `table` from the tabular file at `path`; returns the row count.
    async fn replace_table(&self, table: &str, path: &Path) -> Result<u64, IngestionError>;
}

/// Terminal stage of the pipeline.
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn staging(&self) -> Staging;
    /// Returns the number of rows accepted, when the sink knows it.
    async fn accept(&self, file: &ExtractedFile) -> Result<Option<u64>, IngestionError>;
}
