use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Region},
    error::DisplayErrorContext,
    Client,
};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info};

use crate::domain::{
    error::IngestionError,
    models::{ListPage, Session},
    ports::{ObjectStore, ObjectStoreConnector},
};

/// S3 access bound to a single bucket.
pub struct S3Adapter {
    client: Client,
    bucket: String,
}

impl S3Adapter {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }
}

#[async_trait]
impl ObjectStore for S3Adapter {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage, IngestionError> {
        debug!("Listing s3://{}/{} (continuation: {:?})", self.bucket, prefix, continuation);

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to list s3://{}/{}: {}", self.bucket, prefix, DisplayErrorContext(&e));
                IngestionError::ListingFailed(DisplayErrorContext(&e).to_string())
            })?;

        let keys = response.contents().iter().filter_map(|obj| obj.key().map(str::to_string)).collect();
        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage { keys, next_token })
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IngestionError> {
        debug!("Fetching s3://{}/{}", self.bucket, key);

        let response = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            error!("Failed to fetch s3://{}/{}: {}", self.bucket, key, DisplayErrorContext(&e));
            IngestionError::DownloadFailed { key: key.to_string(), reason: DisplayErrorContext(&e).to_string() }
        })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| IngestionError::DownloadFailed { key: key.to_string(), reason: e.to_string() })?
            .into_bytes()
            .to_vec();

        debug!("Fetched {} bytes from s3://{}/{}", data.len(), self.bucket, key);
        Ok(data)
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64, IngestionError> {
        info!("⬇️ Downloading s3://{}/{}", self.bucket, key);

        let response = self.client.get_object().bucket(&self.bucket).key(key).send().await.map_err(|e| {
            error!("Failed to download s3://{}/{}: {}", self.bucket, key, DisplayErrorContext(&e));
            IngestionError::DownloadFailed { key: key.to_string(), reason: DisplayErrorContext(&e).to_string() }
        })?;

        let transport = |e: std::io::Error| IngestionError::DownloadFailed { key: key.to_string(), reason: e.to_string() };

        let mut body = response.body.into_async_read();
        let mut out = BufWriter::new(tokio::fs::File::create(dest).await?);
        let written = tokio::io::copy(&mut body, &mut out).await.map_err(transport)?;
        out.flush().await?;

        debug!("Saved {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

/// Builds S3 clients from resolved sessions. A custom endpoint switches to
/// path-style addressing for LocalStack and MinIO.
#[derive(Debug, Clone)]
pub struct S3Connector {
    bucket: String,
    endpoint: Option<String>,
    bucket_region: Option<String>,
}

impl S3Connector {
    pub fn new(bucket: impl Into<String>, endpoint: Option<String>) -> Self {
        Self { bucket: bucket.into(), endpoint, bucket_region: None }
    }

    /// Region of the bucket when it differs from the session's region.
    pub fn with_bucket_region(mut self, region: impl Into<String>) -> Self {
        self.bucket_region = Some(region.into());
        self
    }

    fn client_config(&self, session: &Session) -> aws_sdk_s3::Config {
        let region = self.bucket_region.as_deref().unwrap_or(session.region());
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(session.credentials().clone());

        if let Some(endpoint) = &self.endpoint {
            info!("Using custom S3 endpoint: {}", endpoint);
            config = config.endpoint_url(endpoint).force_path_style(true);
        }
        config.build()
    }
}

#[async_trait]
impl ObjectStoreConnector for S3Connector {
    async fn connect(&self, session: &Session) -> Result<Arc<dyn ObjectStore>, IngestionError> {
        let config = self.client_config(session);
        debug!(bucket = %self.bucket, region = ?config.region(), "S3 client initialized");
        Ok(Arc::new(S3Adapter::new(Client::from_conf(config), self.bucket.clone())))
    }
}
