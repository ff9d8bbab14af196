//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_credential_types::{provider::SharedCredentialsProvider, Credentials};
use chrono::Utc;
use cur_ingest::application::ingestion_service::PipelineSettings;
use cur_ingest::domain::{
    error::IngestionError,
    models::{AuthMethod, CacheLayout, ResolvedSession, Session},
    ports::SessionResolver,
};
use flate2::{write::GzEncoder, Compression};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

pub const PREFIX: &str = "cur/daily";

pub fn manifest_key(token: &str) -> String {
    format!("{PREFIX}/20240101-20240201/{token}/Manifest.json")
}

pub fn report_key(token: &str, name: &str) -> String {
    format!("{PREFIX}/20240101-20240201/{token}/{name}")
}

pub fn manifest_body(report_keys: &[String]) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "assemblyId": "test", "reportKeys": report_keys })).unwrap()
}

pub fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

pub fn zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn settings(cache_root: &Path, ingest_all: bool) -> PipelineSettings {
    PipelineSettings {
        region: "us-east-1".to_string(),
        auth_methods: vec![AuthMethod::Static {
            access_key_id: "AKIA".into(),
            secret_access_key: "s".into(),
            session_token: None,
        }],
        prefix: PREFIX.to_string(),
        manifest_name: "Manifest.json".to_string(),
        ingest_all,
        cache: CacheLayout::new(cache_root),
    }
}

/// Resolver that always succeeds, optionally with sessions already close to
/// expiry, and counts how often it was asked.
#[derive(Default)]
pub struct StaticResolver {
    pub calls: AtomicUsize,
    pub short_lived: bool,
}

impl StaticResolver {
    pub fn short_lived() -> Self {
        Self { calls: AtomicUsize::new(0), short_lived: true }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionResolver for StaticResolver {
    async fn resolve(
        &self,
        _methods: &[AuthMethod],
        region: &str,
        _cancel: &CancellationToken,
    ) -> Result<ResolvedSession, IngestionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let creds = SharedCredentialsProvider::new(Credentials::new("AKIA", "s", None, None, "test"));
        let mut session = Session::new(region, 0, "credentials", creds);
        if self.short_lived {
            session = session.with_expiry(Utc::now() + chrono::Duration::seconds(5));
        }
        Ok(ResolvedSession { session, failures: Vec::new() })
    }
}

pub struct FailingResolver;

#[async_trait]
impl SessionResolver for FailingResolver {
    async fn resolve(
        &self,
        methods: &[AuthMethod],
        _region: &str,
        _cancel: &CancellationToken,
    ) -> Result<ResolvedSession, IngestionError> {
        Err(IngestionError::AuthenticationExhausted { attempts: methods.len(), last: "mock auth failure".into() })
    }
}

/// Writer whose contents the test can read back.
#[derive(Clone, Default)]
pub struct Captured(pub Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}
