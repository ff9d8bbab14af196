use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::domain::error::IngestionError;

pub mod archive_fetcher;
pub mod credential_resolver;
pub mod ingestion_service;
pub mod manifest_locator;
pub mod manifest_parser;
pub mod sinks;

/// Races `fut` against the run's cancellation signal. The future is dropped
/// on cancellation, so whatever it was writing stops mid-way.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, IngestionError>
where
    F: Future<Output = Result<T, IngestionError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestionError::Cancelled),
        result = fut => result,
    }
}
