use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::Connection;
use tracing::{debug, error, info};

use crate::domain::{error::IngestionError, ports::TableStore};
use crate::infrastructure::parsers::csv_parser::read_header_file;

/// DuckDB-backed analytical store. One connection, serialized behind a
/// mutex: table replacement is not safe to interleave.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    pub fn open(path: &Path) -> Result<Self, IngestionError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening DuckDB database at {}", path.display());
        let conn = Connection::open(path).map_err(|e| {
            error!("Failed to open DuckDB at {}: {}", path.display(), e);
            IngestionError::Config(format!("open duckdb {}: {}", path.display(), e))
        })?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, IngestionError> {
        let conn = Connection::open_in_memory().map_err(|e| IngestionError::Config(format!("open duckdb: {}", e)))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn row_count(&self, table: &str) -> Result<u64, IngestionError> {
        let conn = self.lock(table)?;
        count_rows(&conn, table)
    }

    fn lock(&self, table: &str) -> Result<std::sync::MutexGuard<'_, Connection>, IngestionError> {
        self.conn.lock().map_err(|_| IngestionError::LoadFailed {
            table: table.to_string(),
            reason: "store connection poisoned".to_string(),
        })
    }

    fn load_blocking(&self, table: &str, path: &Path) -> Result<u64, IngestionError> {
        let headers = read_header_file(table, path)?;
        debug!(table, columns = headers.len(), "Header row detected");

        let sql = format!(
            "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv_auto({}, header = true);",
            quote_ident(table),
            quote_literal(&path.to_string_lossy()),
        );

        let conn = self.lock(table)?;
        conn.execute_batch(&sql).map_err(|e| IngestionError::LoadFailed {
            table: table.to_string(),
            reason: e.to_string(),
        })?;
        count_rows(&conn, table)
    }
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64, IngestionError> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), [], |row| row.get(0))
        .map_err(|e| IngestionError::LoadFailed { table: table.to_string(), reason: e.to_string() })?;
    Ok(count.max(0) as u64)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl TableStore for DuckDbStore {
    async fn replace_table(&self, table: &str, path: &Path) -> Result<u64, IngestionError> {
        let store = self.clone();
        let owned_table = table.to_string();
        let owned_path: PathBuf = path.to_path_buf();

        let rows = tokio::task::spawn_blocking(move || store.load_blocking(&owned_table, &owned_path))
            .await
            .map_err(|e| IngestionError::LoadFailed { table: table.to_string(), reason: e.to_string() })??;

        info!(table, rows, "🦆 Loaded into DuckDB: {}", path.display());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn loads_csv_with_detected_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "usage.csv", "account,cost\n111,1.5\n222,2.5\n333,0.1\n");
        let store = DuckDbStore::open_in_memory().unwrap();

        let rows = store.replace_table("usage", &path).await.unwrap();

        assert_eq!(rows, 3);
        assert_eq!(store.row_count("usage").unwrap(), 3);
    }

    #[tokio::test]
    async fn reloading_replaces_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "usage.csv", "account,cost\n111,1.5\n222,2.5\n");
        let store = DuckDbStore::open_in_memory().unwrap();

        store.replace_table("usage", &path).await.unwrap();
        write(dir.path(), "usage.csv", "account,cost\n111,1.5\n222,2.5\n333,4.0\n444,0.5\n555,9.9\n");
        let rows = store.replace_table("usage", &path).await.unwrap();

        assert_eq!(rows, 5);
        assert_eq!(store.row_count("usage").unwrap(), 5);
    }

    #[tokio::test]
    async fn binary_file_is_a_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.csv");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x9f, 0x80, b'\n', 0xc3]).unwrap();
        let store = DuckDbStore::open_in_memory().unwrap();

        let err = store.replace_table("junk", &path).await.unwrap_err();

        assert!(matches!(err, IngestionError::LoadFailed { ref table, .. } if table == "junk"));
    }

    #[tokio::test]
    async fn file_backed_store_persists_tables() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write(dir.path(), "usage.csv", "a,b\n1,2\n");
        let db = dir.path().join("db/cur.duckdb");

        DuckDbStore::open(&db).unwrap().replace_table("usage", &csv).await.unwrap();

        assert_eq!(DuckDbStore::open(&db).unwrap().row_count("usage").unwrap(), 1);
    }

    #[test]
    fn literals_and_identifiers_are_escaped() {
        assert_eq!(quote_literal("/tmp/o'neil.csv"), "'/tmp/o''neil.csv'");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
