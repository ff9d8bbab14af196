//! Decompression of downloaded report objects.
//!
//! A report key ending in `.gz` is a gzip stream (possibly several
//! concatenated members); anything else is a zip archive holding one or more
//! tabular files. The same expansion code
//! feeds both the on-disk cache and the in-memory preview path; only the
//! [`EntryWriter`] differs.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::domain::{error::IngestionError, models::base_name};

pub const GZIP_SUFFIX: &str = ".gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    Zip,
}

impl ArchiveKind {
    pub fn for_key(key: &str) -> Self {
        if key.ends_with(GZIP_SUFFIX) {
            ArchiveKind::Gzip
        } else {
            ArchiveKind::Zip
        }
    }
}

/// Destination for decompressed entries.
pub trait EntryWriter {
    type Output;

    fn write_entry(&mut self, name: &str, reader: &mut dyn Read) -> io::Result<Self::Output>;

    /// Drops whatever a failed `write_entry` left behind.
    fn discard(&mut self, _name: &str) {}
}

/// Writes entries as files inside one directory.
pub struct DirWriter {
    dir: PathBuf,
}

impl DirWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl EntryWriter for DirWriter {
    type Output = PathBuf;

    fn write_entry(&mut self, name: &str, reader: &mut dyn Read) -> io::Result<PathBuf> {
        let path = self.dir.join(name);
        let mut out = BufWriter::new(File::create(&path)?);
        let written = io::copy(reader, &mut out)?;
        out.flush()?;
        debug!(path = %path.display(), bytes = written, "Extracted file");
        Ok(path)
    }

    fn discard(&mut self, name: &str) {
        let _ = std::fs::remove_file(self.dir.join(name));
    }
}

/// Collects entries in memory as `(name, bytes)`.
#[derive(Default)]
pub struct MemoryWriter;

impl EntryWriter for MemoryWriter {
    type Output = (String, Vec<u8>);

    fn write_entry(&mut self, name: &str, reader: &mut dyn Read) -> io::Result<Self::Output> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok((name.to_string(), buf))
    }
}

/// Expands the archive behind `reader`. Only an unreadable container is an
/// error; zip entries that fail to open or copy are logged and left out.
pub fn expand<R, W>(source_key: &str, reader: R, writer: &mut W) -> Result<Vec<W::Output>, IngestionError>
where
    R: Read + Seek,
    W: EntryWriter,
{
    match ArchiveKind::for_key(source_key) {
        ArchiveKind::Gzip => expand_gzip(source_key, reader, writer).map(|out| vec![out]),
        ArchiveKind::Zip => expand_zip(source_key, reader, writer),
    }
}

fn expand_gzip<R: Read, W: EntryWriter>(source_key: &str, reader: R, writer: &mut W) -> Result<W::Output, IngestionError> {
    let name = base_name(source_key);
    let name = name.strip_suffix(GZIP_SUFFIX).unwrap_or(name);
    let mut decoder = SourceErrors::new(MultiGzDecoder::new(reader));

    writer.write_entry(name, &mut decoder).map_err(|e| {
        writer.discard(name);
        if decoder.failed {
            IngestionError::ArchiveUnreadable { name: source_key.to_string(), reason: format!("gzip: {}", e) }
        } else {
            IngestionError::Io(e)
        }
    })
}

/// Remembers whether a read error came from the wrapped source, so decode
/// failures can be told apart from failures of the destination.
struct SourceErrors<R> {
    inner: R,
    failed: bool,
}

impl<R> SourceErrors<R> {
    fn new(inner: R) -> Self {
        Self { inner, failed: false }
    }
}

impl<R: Read> Read for SourceErrors<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

fn expand_zip<R: Read + Seek, W: EntryWriter>(
    source_key: &str,
    reader: R,
    writer: &mut W,
) -> Result<Vec<W::Output>, IngestionError> {
    let mut archive = ZipArchive::new(reader).map_err(|e| IngestionError::ArchiveUnreadable {
        name: source_key.to_string(),
        reason: format!("zip: {}", e),
    })?;

    let mut extracted = Vec::with_capacity(archive.len());
    let mut seen = HashSet::new();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(archive = source_key, index, "Skipping unreadable zip entry: {}", e);
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            warn!(archive = source_key, entry = entry.name(), "Skipping zip entry with unsafe name");
            continue;
        };
        if !seen.insert(name.clone()) {
            warn!(archive = source_key, entry = entry.name(), "Skipping zip entry whose file name was already extracted");
            continue;
        }

        match writer.write_entry(&name, &mut entry) {
            Ok(out) => extracted.push(out),
            Err(e) => {
                warn!(archive = source_key, entry = %name, "Failed to extract zip entry: {}", e);
                writer.discard(&name);
            }
        }
    }
    Ok(extracted)
}
