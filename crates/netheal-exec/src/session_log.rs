//! Append-only JSONL record of every batch run against a device

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::device::DeviceKind;
use crate::error::ExecError;
use crate::result::{BatchOutcome, CommandResult};

/// One line of the session log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub kind: DeviceKind,
    pub results: Vec<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

impl SessionRecord {
    pub fn from_outcome(kind: DeviceKind, outcome: &BatchOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            device: outcome.device.clone(),
            kind,
            results: outcome.results.clone(),
            connection_error: outcome.connection_error.clone(),
        }
    }
}

/// Serialized appender; concurrent batches never interleave lines
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    ///
    /// # Errors
    /// I/O failure creating or writing the file.
    pub async fn append(&self, record: &SessionRecord) -> Result<(), ExecError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| ExecError::Io(std::io::Error::other(e)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every record back
    ///
    /// # Errors
    /// I/O failure or a malformed line.
    pub async fn read_all(&self) -> Result<Vec<SessionRecord>, ExecError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                serde_json::from_str(l).map_err(|e| ExecError::Io(std::io::Error::other(e)))
            })
            .collect()
    }
}
