use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("no valid AWS auth method after {attempts} attempt(s): {last}")]
    AuthenticationExhausted { attempts: usize, last: String },

    #[error("unsupported auth method type {0:?}")]
    UnsupportedAuthMethod(String),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("listing objects failed: {0}")]
    ListingFailed(String),

    #[error("failed to fetch manifest {key}: {reason}")]
    ManifestFetchFailed { key: String, reason: String },

    #[error("failed to parse manifest {key}: {reason}")]
    ManifestParseFailed { key: String, reason: String },

    #[error("failed to download {key}: {reason}")]
    DownloadFailed { key: String, reason: String },

    #[error("archive {name} is unreadable: {reason}")]
    ArchiveUnreadable { name: String, reason: String },

    #[error("failed to load table {table}: {reason}")]
    LoadFailed { table: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl IngestionError {
    /// Errors that leave nothing useful to do for the rest of the run.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            IngestionError::AuthenticationExhausted { .. }
                | IngestionError::ListingFailed(_)
                | IngestionError::Cancelled
        )
    }
}
