use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::application::{ingestion_service::PipelineSettings, manifest_locator::DEFAULT_MANIFEST_NAME};
use crate::domain::{
    error::IngestionError,
    models::{billing_period, AuthMethod, CacheLayout, ReportFormat, DEFAULT_ROLE_SESSION},
};

pub const CONFIG_PATH_ENV: &str = "CUR_INGEST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub aws: AwsConfig,
    pub cur: CurConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: String,
    /// Custom S3 endpoint (LocalStack, MinIO).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub auth: Vec<AuthMethodConfig>,
    /// Keys from `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`; tried before `auth`.
    #[serde(skip)]
    pub env_credentials: Option<EnvCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Auth method as written in YAML. Kept loose so that an unknown `type`
/// reaches the resolver instead of failing the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthMethodConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "accessKeyID", default)]
    pub access_key_id: Option<String>,
    #[serde(rename = "secretKey", default)]
    pub secret_key: Option<String>,
    #[serde(rename = "sessionToken", default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(rename = "profile", default)]
    pub profile_name: Option<String>,
    #[serde(rename = "role-to-assume", default)]
    pub role_to_assume: Option<String>,
    /// Assumed-role session length in seconds.
    #[serde(rename = "session-duration", default)]
    pub session_duration: Option<u64>,
}

impl AuthMethodConfig {
    pub fn to_method(&self) -> AuthMethod {
        match self.kind.as_str() {
            "credentials" => AuthMethod::Static {
                access_key_id: self.access_key_id.clone().unwrap_or_default(),
                secret_access_key: self.secret_key.clone().unwrap_or_default(),
                session_token: self.session_token.clone().filter(|t| !t.is_empty()),
            },
            "profile" => AuthMethod::Profile {
                path: self.path.clone(),
                profile_name: self.profile_name.clone().unwrap_or_default(),
            },
            "iam" => AuthMethod::AssumeRole {
                role_arn: self.role_to_assume.clone().unwrap_or_default(),
                session_duration: self.session_duration.map(Duration::from_secs).unwrap_or(DEFAULT_ROLE_SESSION),
            },
            other => AuthMethod::Unsupported { kind: other.to_string() },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Bucket region when it differs from `aws.region`.
    #[serde(default)]
    pub region: Option<String>,
    /// Declared report format; read only by the preview sink.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(rename = "ingest-all", default)]
    pub ingest_all: bool,
    #[serde(rename = "manifest-name", default = "default_manifest_name")]
    pub manifest_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "cache-path", default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { cache_path: default_cache_path(), database_path: default_database_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_lines")]
    pub lines: usize,
    /// Restricts preview listing to the billing period containing this day.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { lines: default_preview_lines(), date: None }
    }
}

fn default_format() -> String {
    "csv".to_string()
}

fn default_manifest_name() -> String {
    DEFAULT_MANIFEST_NAME.to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./cur.duckdb")
}

fn default_preview_lines() -> usize {
    5
}

impl Config {
    /// Reads the YAML file, applies environment overrides, then validates.
    pub fn load_file(path: &Path) -> Result<Self, IngestionError> {
        debug!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IngestionError::Config(format!("read config file {}: {}", path.display(), e)))?;

        let mut config = Self::from_yaml(&raw)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        info!(
            aws_region = %config.aws.region,
            auth_methods = config.aws.auth.len(),
            cur_bucket = %config.cur.bucket,
            cur_prefix = %config.cur.prefix,
            "config loaded"
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, IngestionError> {
        serde_yaml::from_str(raw).map_err(|e| IngestionError::Config(format!("parse config: {}", e)))
    }

    /// Environment values win over the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AWS_REGION") {
            self.aws.region = v;
        }
        if let (Some(id), Some(secret)) = (lookup("AWS_ACCESS_KEY_ID"), lookup("AWS_SECRET_ACCESS_KEY")) {
            if !id.is_empty() && !secret.is_empty() {
                self.aws.env_credentials = Some(EnvCredentials {
                    access_key_id: id,
                    secret_access_key: secret,
                    session_token: lookup("AWS_SESSION_TOKEN").filter(|t| !t.is_empty()),
                });
            }
        }
        if let Some(v) = lookup("AWS_ENDPOINT_URL") {
            self.aws.endpoint = Some(v);
        }
        if let Some(v) = lookup("CUR_BUCKET") {
            self.cur.bucket = v;
        }
        if let Some(v) = lookup("CUR_PREFIX") {
            self.cur.prefix = v;
        }
        if let Some(v) = lookup("CUR_REGION") {
            self.cur.region = Some(v);
        }
        if let Some(v) = lookup("CUR_PREVIEW_DATE") {
            match NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d") {
                Ok(date) => self.preview.date = Some(date),
                Err(e) => warn!("Ignoring CUR_PREVIEW_DATE {:?}: {}", v, e),
            }
        }
        if let Some(v) = lookup("CUR_CACHE_PATH") {
            self.storage.cache_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CUR_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CUR_INGEST_ALL") {
            self.cur.ingest_all = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> Result<(), IngestionError> {
        if self.aws.region.is_empty() {
            return Err(IngestionError::Config("config.aws.region is required".to_string()));
        }
        if self.aws.auth.is_empty() && self.aws.env_credentials.is_none() {
            return Err(IngestionError::Config(
                "config.aws.auth must have at least one method (or set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY)"
                    .to_string(),
            ));
        }
        if self.cur.bucket.is_empty() {
            return Err(IngestionError::Config("config.cur.bucket is required".to_string()));
        }
        if self.cur.prefix.is_empty() {
            return Err(IngestionError::Config("config.cur.prefix is required".to_string()));
        }
        if self.cur.manifest_name.is_empty() || self.cur.manifest_name.contains('/') {
            return Err(IngestionError::Config("config.cur.manifest-name must be a plain file name".to_string()));
        }

        for (i, m) in self.aws.auth.iter().enumerate() {
            let missing = |what: &str| IngestionError::Config(format!("auth[{}]: {} requires {}", i, m.kind, what));
            match m.kind.as_str() {
                "credentials" => {
                    if is_blank(&m.access_key_id) || is_blank(&m.secret_key) {
                        return Err(missing("accessKeyID and secretKey"));
                    }
                }
                "profile" => {
                    if is_blank(&m.profile_name) {
                        return Err(missing("profile"));
                    }
                }
                "iam" => {
                    if is_blank(&m.role_to_assume) {
                        return Err(missing("role-to-assume"));
                    }
                    if m.session_duration == Some(0) {
                        return Err(IngestionError::Config(format!("auth[{}]: session-duration must be positive", i)));
                    }
                }
                other => warn!("auth[{}]: unknown type {:?}, it will be skipped at runtime", i, other),
            }
        }
        Ok(())
    }

    /// Chain order: environment keys first, then `aws.auth` as listed.
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        let from_env = self.aws.env_credentials.iter().map(|c| AuthMethod::Static {
            access_key_id: c.access_key_id.clone(),
            secret_access_key: c.secret_access_key.clone(),
            session_token: c.session_token.clone(),
        });
        from_env.chain(self.aws.auth.iter().map(AuthMethodConfig::to_method)).collect()
    }

    /// Region used for S3 calls; `cur.region` wins over `aws.region`.
    pub fn bucket_region(&self) -> &str {
        self.cur.region.as_deref().filter(|r| !r.is_empty()).unwrap_or(&self.aws.region)
    }

    /// Listing prefix for preview runs, scoped to one billing period when
    /// `preview.date` is set.
    pub fn preview_prefix(&self) -> String {
        match self.preview.date {
            Some(date) => format!("{}/{}", self.cur.prefix.trim_end_matches('/'), billing_period(date)),
            None => self.cur.prefix.clone(),
        }
    }

    pub fn report_format(&self) -> ReportFormat {
        ReportFormat::parse(&self.cur.format)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            region: self.aws.region.clone(),
            auth_methods: self.auth_methods(),
            prefix: self.cur.prefix.clone(),
            manifest_name: self.cur.manifest_name.clone(),
            ingest_all: self.cur.ingest_all,
            cache: CacheLayout::new(&self.storage.cache_path),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
