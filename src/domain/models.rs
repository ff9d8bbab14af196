use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use aws_credential_types::provider::SharedCredentialsProvider;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default lifetime requested for assumed-role sessions.
pub const DEFAULT_ROLE_SESSION: Duration = Duration::from_secs(15 * 60);

/// One entry of the credential chain. Order in the configured list is the
/// fallback priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Static {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    Profile {
        path: Option<PathBuf>,
        profile_name: String,
    },
    AssumeRole {
        role_arn: String,
        session_duration: Duration,
    },
    /// A tag the resolver does not know how to build; fails only its own entry.
    Unsupported { kind: String },
}

impl AuthMethod {
    pub fn kind(&self) -> &str {
        match self {
            AuthMethod::Static { .. } => "credentials",
            AuthMethod::Profile { .. } => "profile",
            AuthMethod::AssumeRole { .. } => "iam",
            AuthMethod::Unsupported { kind } => kind,
        }
    }
}

/// Authenticated handle produced by exactly one [`AuthMethod`].
#[derive(Clone)]
pub struct Session {
    region: String,
    method_index: usize,
    method_kind: String,
    credentials: SharedCredentialsProvider,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        region: impl Into<String>,
        method_index: usize,
        method_kind: impl Into<String>,
        credentials: SharedCredentialsProvider,
    ) -> Self {
        Self {
            region: region.into(),
            method_index,
            method_kind: method_kind.into(),
            credentials,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn method_index(&self) -> usize {
        self.method_index
    }

    pub fn method_kind(&self) -> &str {
        &self.method_kind
    }

    pub fn credentials(&self) -> &SharedCredentialsProvider {
        &self.credentials
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True when the session will be unusable within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now + margin)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("region", &self.region)
            .field("method_index", &self.method_index)
            .field("method_kind", &self.method_kind)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A failed attempt in the credential chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub index: usize,
    pub kind: String,
    pub diagnostic: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub session: Session,
    pub failures: Vec<AuthFailure>,
}

/// Timestamp token identifying a billing period. `Default` is the sentinel
/// for keys without one and orders below every real token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeriodToken {
    Default,
    Stamp(String),
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9][0-9:.\-]*T[0-9:.\-]+Z$").expect("valid token regex"))
}

impl PeriodToken {
    /// First path segment shaped like an ISO-8601 `…T…Z` instant.
    pub fn from_key(key: &str) -> Self {
        key.split('/')
            .find(|segment| token_pattern().is_match(segment))
            .map(|segment| PeriodToken::Stamp(segment.to_string()))
            .unwrap_or(PeriodToken::Default)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PeriodToken::Default => "default",
            PeriodToken::Stamp(s) => s,
        }
    }
}

impl fmt::Display for PeriodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestKey {
    pub key: String,
    pub token: PeriodToken,
}

impl ManifestKey {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let token = PeriodToken::from_key(&key);
        Self { key, token }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub report_keys: Vec<String>,
}

/// CUR billing-period folder containing `date`, e.g. `20240101-20240201`.
pub fn billing_period(date: NaiveDate) -> String {
    let start = date.with_day(1).unwrap_or(date);
    let end = start.checked_add_months(Months::new(1)).unwrap_or(start);
    format!("{}-{}", start.format("%Y%m%d"), end.format("%Y%m%d"))
}

/// Local cache layout, keyed by period token so reruns for the same period
/// land in the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/manifests/<token>.json`
    pub fn manifest_path(&self, token: &PeriodToken) -> PathBuf {
        self.root.join("manifests").join(format!("{}.json", token.as_str()))
    }

    /// `<root>/data/<token>`
    pub fn data_dir(&self, token: &PeriodToken) -> PathBuf {
        self.root.join("data").join(token.as_str())
    }
}

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Report format declared in configuration. Only the preview sink reads it;
/// the loader decides by key suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Parquet,
    Other(String),
}

impl ReportFormat {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "csv" => ReportFormat::Csv,
            "parquet" => ReportFormat::Parquet,
            other => ReportFormat::Other(other.to_string()),
        }
    }
}

/// Where extracted reports are staged before they reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staging {
    LocalCache,
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub source_key: String,
    pub file_name: String,
    pub table_name: String,
    pub payload: Payload,
}

impl ExtractedFile {
    pub fn on_disk(source_key: &str, path: PathBuf) -> Self {
        let file_name = base_name(&path.to_string_lossy()).to_string();
        Self {
            source_key: source_key.to_string(),
            table_name: table_name_for(&file_name),
            file_name,
            payload: Payload::File(path),
        }
    }

    pub fn in_memory(source_key: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            source_key: source_key.to_string(),
            file_name: file_name.to_string(),
            table_name: table_name_for(file_name),
            payload: Payload::Bytes(bytes),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::File(path) => Some(path),
            Payload::Bytes(_) => None,
        }
    }
}

/// Final path segment of an object key or local path.
pub fn base_name(key: &str) -> &str {
    key.rsplit(['/', '\\']).next().unwrap_or(key)
}

/// Table name for an extracted file: base name without extensions,
/// lower-cased, with anything outside `[a-z0-9_]` collapsed to `_`.
pub fn table_name_for(file_name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid = INVALID.get_or_init(|| Regex::new(r"[^a-z0-9_]+").expect("valid table regex"));

    let stem = base_name(file_name).split('.').next().unwrap_or_default().to_lowercase();
    let name = invalid.replace_all(&stem, "_");
    let name = name.trim_matches('_');

    match name.chars().next() {
        None => "cur_report".to_string(),
        Some(c) if c.is_ascii_digit() => format!("t_{name}"),
        Some(_) => name.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Loaded { rows: Option<u64> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub table_name: String,
    pub source_key: String,
    pub status: FileStatus,
}

/// Processing state for one manifest.
#[derive(Debug, Clone)]
pub struct IngestionRun {
    pub manifest: ManifestKey,
    pub report_keys: usize,
    pub files: Vec<FileOutcome>,
    pub error: Option<String>,
}

impl IngestionRun {
    pub fn new(manifest: ManifestKey) -> Self {
        Self { manifest, report_keys: 0, files: Vec::new(), error: None }
    }

    pub fn loaded(&self) -> usize {
        self.files.iter().filter(|f| matches!(f.status, FileStatus::Loaded { .. })).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.loaded()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Authenticating,
    Locating,
    Parsing,
    Fetching,
    Loading,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Authenticating => "authenticating",
            PipelineStage::Locating => "locating",
            PipelineStage::Parsing => "parsing",
            PipelineStage::Fetching => "fetching",
            PipelineStage::Loading => "loading",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stage: PipelineStage,
    pub manifests_found: usize,
    pub runs: Vec<IngestionRun>,
}

impl RunSummary {
    pub fn manifests_processed(&self) -> usize {
        self.runs.iter().filter(|r| r.error.is_none()).count()
    }

    pub fn manifests_failed(&self) -> usize {
        self.runs.len() - self.manifests_processed()
    }

    pub fn files_extracted(&self) -> usize {
        self.runs.iter().map(|r| r.files.len()).sum()
    }

    pub fn files_loaded(&self) -> usize {
        self.runs.iter().map(IngestionRun::loaded).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.runs.iter().map(IngestionRun::failed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_taken_from_the_timestamp_segment() {
        let token = PeriodToken::from_key("cur/report/20240101-20240201/20240105T120000Z/Manifest.json");
        assert_eq!(token, PeriodToken::Stamp("20240105T120000Z".into()));
    }

    #[test]
    fn keys_without_timestamp_get_the_sentinel() {
        let token = PeriodToken::from_key("cur/report/20240101-20240201/Manifest.json");
        assert_eq!(token, PeriodToken::Default);
        assert_eq!(token.as_str(), "default");
    }

    #[test]
    fn sentinel_sorts_below_real_tokens() {
        let stamp = PeriodToken::Stamp("00000101T000000Z".into());
        assert!(PeriodToken::Default < stamp);
    }

    #[test]
    fn segments_that_merely_contain_t_and_z_are_not_tokens() {
        assert_eq!(PeriodToken::from_key("Test/CUR-Z/Manifest.json"), PeriodToken::Default);
    }

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(table_name_for("data/cur-report-00001.csv"), "cur_report_00001");
        assert_eq!(table_name_for("2024 Usage.csv.gz"), "t_2024_usage");
        assert_eq!(table_name_for("...csv"), "cur_report");
    }

    #[test]
    fn billing_period_spans_the_calendar_month() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 17).unwrap();
        assert_eq!(billing_period(date), "20241201-20250101");
    }

    #[test]
    fn manifest_ignores_unknown_fields() {
        let manifest: Manifest =
            serde_json::from_str(r#"{"assemblyId":"abc","reportKeys":["a.csv.gz"],"bucket":"b"}"#).unwrap();
        assert_eq!(manifest.report_keys, vec!["a.csv.gz".to_string()]);
    }

    #[test]
    fn session_expiry_uses_margin() {
        let now = Utc::now();
        let creds = SharedCredentialsProvider::new(aws_credential_types::Credentials::new(
            "id", "secret", None, None, "test",
        ));
        let session = Session::new("us-east-1", 0, "iam", creds.clone())
            .with_expiry(now + chrono::Duration::seconds(30));
        assert!(session.expires_within(now, chrono::Duration::seconds(60)));
        assert!(!session.expires_within(now, chrono::Duration::seconds(10)));

        let static_session = Session::new("us-east-1", 0, "credentials", creds);
        assert!(!static_session.expires_within(now, chrono::Duration::days(365)));
    }
}
