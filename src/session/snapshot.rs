//! Session snapshot persistence.
//!
//! The whole table is loaded once at startup and rewritten wholesale after
//! each mutation. The on-disk format is a JSON object keyed by session id.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use thiserror::Error;

use crate::session::record::Session;

pub type SessionTable = BTreeMap<String, Session>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Key-value snapshot collaborator for the session registry.
pub trait SnapshotStore: Send + Sync {
    /// Read the full table. A store that has never been written yields an
    /// empty table.
    fn load(&self) -> Result<SessionTable, SnapshotError>;

    /// Replace the stored table.
    fn save(&self, sessions: &SessionTable) -> Result<(), SnapshotError>;
}

/// JSON file snapshot, written through a temporary file and renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<SessionTable, SnapshotError> {
        if !self.path.exists() {
            return Ok(SessionTable::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn save(&self, sessions: &SessionTable) -> Result<(), SnapshotError> {
        let tmp = self.temp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, sessions)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = ?self.path, sessions = sessions.len(), "Session snapshot written");
        Ok(())
    }
}
