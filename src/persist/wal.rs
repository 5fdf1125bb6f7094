use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::timeline::FusedEntry;

/// Write-ahead sink for fused entries, the storage adapter seam.
///
/// `record` must make the entry durable before returning: an entry lost
/// before a durable write is acceptable, an entry durably written must
/// never silently disappear.
pub trait EntryLog: Send {
    fn record(&mut self, entry: &FusedEntry) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that keeps nothing (tests, ephemeral sessions)
pub struct NullEntryLog;

impl EntryLog for NullEntryLog {
    fn record(&mut self, _entry: &FusedEntry) -> io::Result<()> {
        Ok(())
    }
}

/// One JSON line per entry, flushed on every record
pub struct JsonlEntryLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl JsonlEntryLog {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        info!("write-ahead log at {:?}", path);
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntryLog for JsonlEntryLog {
    fn record(&mut self, entry: &FusedEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Read a JSONL entry log back, e.g. for crash recovery or tests
pub fn read_entries(path: &Path) -> Result<Vec<FusedEntry>> {
    let file = File::open(path).with_context(|| format!("Failed to open entry log {:?}", path))?;
    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read entry log line")?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: FusedEntry = serde_json::from_str(&line)
            .with_context(|| format!("Malformed entry at line {}", idx + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}
