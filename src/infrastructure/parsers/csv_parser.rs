use std::io::{BufRead, Cursor, Read};
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, error};

use crate::domain::error::IngestionError;

/// Reads the header row of a tabular file. Fails when the file is empty or
/// the header is not valid UTF-8, which is the cheapest way to reject
/// binary junk before it reaches the store.
pub fn read_header<R: Read>(source: R) -> Result<Vec<String>, csv::Error> {
    let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(source);
    let headers = reader.headers()?.iter().map(str::to_string).collect::<Vec<_>>();
    debug!("CSV headers: {:?}", headers);
    Ok(headers)
}

pub fn read_header_file(table: &str, path: &Path) -> Result<Vec<String>, IngestionError> {
    let file = std::fs::File::open(path).map_err(|e| IngestionError::LoadFailed {
        table: table.to_string(),
        reason: format!("open {}: {}", path.display(), e),
    })?;

    let headers = read_header(file).map_err(|e| {
        error!("Failed to read CSV headers from {}: {}", path.display(), e);
        IngestionError::LoadFailed { table: table.to_string(), reason: format!("unreadable header row: {}", e) }
    })?;

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestionError::LoadFailed { table: table.to_string(), reason: "missing header row".to_string() });
    }
    Ok(headers)
}

/// First `limit` lines of a decompressed report, lossily decoded.
pub fn sample_lines(bytes: &[u8], limit: usize) -> Vec<String> {
    Cursor::new(bytes)
        .split(b'\n')
        .take(limit)
        .filter_map(Result::ok)
        .map(|line| String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(&line[..])).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_row_is_read() {
        let headers = read_header(&b"bill/PayerAccountId,lineItem/UsageType\n1,BoxUsage\n"[..]).unwrap();
        assert_eq!(headers, vec!["bill/PayerAccountId", "lineItem/UsageType"]);
    }

    #[test]
    fn binary_header_is_rejected() {
        assert!(read_header(&[0xff, 0xfe, 0x00, 0x9f, b'\n'][..]).is_err());
    }

    #[test]
    fn empty_file_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, b"").unwrap();

        let err = read_header_file("empty", &path).unwrap_err();
        assert!(matches!(err, IngestionError::LoadFailed { ref reason, .. } if reason.contains("missing header")));
    }

    #[test]
    fn samples_stop_at_limit_and_strip_crlf() {
        let lines = sample_lines(b"h1,h2\r\na,b\r\nc,d\r\ne,f\r\n", 3);
        assert_eq!(lines, vec!["h1,h2", "a,b", "c,d"]);
    }
}
