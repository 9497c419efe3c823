use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use wellspring_core::{Thought, WellspringError};

/// Append-only JSONL audit log mirroring every stored thought.
///
/// One complete, self-contained thought per line. File order is insertion
/// order and is not authoritative — the log is a recovery and interchange
/// format, replayable into a fresh store.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WellspringError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one thought as a single JSON line and fsync it.
    pub fn append(&self, thought: &Thought) -> Result<(), WellspringError> {
        let line = serde_json::to_string(&thought.to_json())
            .map_err(|e| WellspringError::Serialization(e.to_string()))?;
        let mut file = self.file.lock().expect("audit log lock poisoned");
        writeln!(file, "{line}").map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        file.sync_data().map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        Ok(())
    }

    /// Number of records appended so far. Background indexing resumes from
    /// this position.
    pub fn len_lines(&self) -> Result<u64, WellspringError> {
        let file = File::open(&self.path).map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        Ok(BufReader::new(file).lines().count() as u64)
    }

    /// Parse every line of a log back into thoughts. Malformed lines abort
    /// the replay with an error rather than being skipped silently.
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<Vec<Thought>, WellspringError> {
        let file = File::open(path).map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| WellspringError::StoreIO(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let json: serde_json::Value = serde_json::from_str(&line)
                .map_err(|e| WellspringError::Serialization(e.to_string()))?;
            out.push(Thought::from_json(&json)?);
        }
        Ok(out)
    }
}
