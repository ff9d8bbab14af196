use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{
    error::IngestionError,
    models::{ExtractedFile, Payload, ReportFormat, Staging},
    ports::{ReportSink, TableStore},
};
use crate::infrastructure::parsers::csv_parser::sample_lines;

/// Bulk-loads each extracted file into the analytical store.
pub struct StoreLoader {
    store: Arc<dyn TableStore>,
}

impl StoreLoader {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReportSink for StoreLoader {
    fn name(&self) -> &'static str {
        "store-loader"
    }

    fn staging(&self) -> Staging {
        Staging::LocalCache
    }

    async fn accept(&self, file: &ExtractedFile) -> Result<Option<u64>, IngestionError> {
        let path = file.path().ok_or_else(|| IngestionError::LoadFailed {
            table: file.table_name.clone(),
            reason: "report was not staged on disk".to_string(),
        })?;
        let rows = self.store.replace_table(&file.table_name, path).await?;
        Ok(Some(rows))
    }
}

/// Prints the first lines of every report instead of loading it.
pub struct PreviewSampler {
    lines: usize,
    format: ReportFormat,
    out: Mutex<Box<dyn Write + Send>>,
}

impl PreviewSampler {
    pub fn new(lines: usize, format: ReportFormat) -> Self {
        Self::with_writer(lines, format, Box::new(std::io::stdout()))
    }

    pub fn with_writer(lines: usize, format: ReportFormat, out: Box<dyn Write + Send>) -> Self {
        Self { lines, format, out: Mutex::new(out) }
    }

    fn print(&self, file: &ExtractedFile, body: &[String]) -> std::io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "=== Report: {} ({}) ===", file.source_key, file.file_name)?;
        for line in body {
            writeln!(out, "{}", line)?;
        }
        out.flush()
    }
}

#[async_trait]
impl ReportSink for PreviewSampler {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn staging(&self) -> Staging {
        Staging::InMemory
    }

    async fn accept(&self, file: &ExtractedFile) -> Result<Option<u64>, IngestionError> {
        let failed = |reason: String| IngestionError::LoadFailed { table: file.table_name.clone(), reason };

        let body = match &self.format {
            ReportFormat::Csv => {
                let from_disk;
                let bytes: &[u8] = match &file.payload {
                    Payload::Bytes(bytes) => bytes,
                    Payload::File(path) => {
                        from_disk = tokio::fs::read(path).await?;
                        &from_disk
                    }
                };
                sample_lines(bytes, self.lines)
            }
            ReportFormat::Parquet => vec!["(Parquet report; parsing not implemented)".to_string()],
            ReportFormat::Other(format) => return Err(failed(format!("unsupported CUR format {:?}", format))),
        };

        debug!(report = %file.source_key, lines = body.len(), "Printing preview");
        self.print(file, &body).map_err(|e| failed(e.to_string()))?;
        Ok(Some(body.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Shared buffer so the test can read what the sampler printed.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

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
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn preview_prints_first_lines() {
        let captured = Captured::default();
        let sampler = PreviewSampler::with_writer(2, ReportFormat::Csv, Box::new(captured.clone()));
        let file = ExtractedFile::in_memory("cur/p/report-1.csv.gz", "report-1.csv", b"h1,h2\na,b\nc,d\n".to_vec());

        let printed = sampler.accept(&file).await.unwrap();

        assert_eq!(printed, Some(2));
        assert_eq!(captured.text(), "=== Report: cur/p/report-1.csv.gz (report-1.csv) ===\nh1,h2\na,b\n");
    }

    #[tokio::test]
    async fn parquet_preview_prints_placeholder() {
        let captured = Captured::default();
        let sampler = PreviewSampler::with_writer(5, ReportFormat::Parquet, Box::new(captured.clone()));
        let file = ExtractedFile::in_memory("k/r.parquet.gz", "r.parquet", vec![0, 1, 2]);

        sampler.accept(&file).await.unwrap();
        assert!(captured.text().contains("parsing not implemented"));
    }

    #[tokio::test]
    async fn unknown_format_is_a_per_file_failure() {
        let sampler = PreviewSampler::with_writer(5, ReportFormat::parse("orc"), Box::new(Captured::default()));
        let file = ExtractedFile::in_memory("k/r.orc.gz", "r.orc", vec![]);

        let err = sampler.accept(&file).await.unwrap_err();
        assert!(matches!(err, IngestionError::LoadFailed { ref reason, .. } if reason.contains("orc")));
    }

    struct CountingStore;

    #[async_trait]
    impl TableStore for CountingStore {
        async fn replace_table(&self, _table: &str, path: &Path) -> Result<u64, IngestionError> {
            Ok(std::fs::read_to_string(path)?.lines().count().saturating_sub(1) as u64)
        }
    }

    #[tokio::test]
    async fn loader_requires_a_staged_file() {
        let loader = StoreLoader::new(Arc::new(CountingStore));
        let err = loader.accept(&ExtractedFile::in_memory("k", "r.csv", b"a\n1\n".to_vec())).await.unwrap_err();
        assert!(matches!(err, IngestionError::LoadFailed { .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        std::fs::write(&path, "a\n1\n2\n").unwrap();
        let rows = loader.accept(&ExtractedFile::on_disk("k/r.zip", path)).await.unwrap();
        assert_eq!(rows, Some(2));
    }
}
