//! File checkpoints
//!
//! Every stage writes its output under the data directory before the next
//! stage starts. Writes go to a temp file in the target directory and are
//! renamed into place, so a crash never leaves a half-written checkpoint.
//!
//! Layout:
//! - `input/combined_alarms.json`
//! - `reports/agentic_initial_report.json`, `reports/agentic_final_report.json`
//! - `reports/rca/<alarm>.md` (overwritten each round)
//! - `reports/remediation_log.json`
//! - `reports/insights/<alarm>/round-<n>/{command_results,detailed,summary}/<device>`

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::NetHealError;
use crate::types::AlarmId;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn combined_alarms(&self) -> PathBuf {
        self.root.join("input").join("combined_alarms.json")
    }

    #[must_use]
    pub fn initial_report(&self) -> PathBuf {
        self.reports().join("agentic_initial_report.json")
    }

    #[must_use]
    pub fn final_report(&self) -> PathBuf {
        self.reports().join("agentic_final_report.json")
    }

    #[must_use]
    pub fn remediation_log(&self) -> PathBuf {
        self.reports().join("remediation_log.json")
    }

    #[must_use]
    pub fn rca_narrative(&self, alarm: &AlarmId) -> PathBuf {
        self.reports().join("rca").join(format!("{}.md", slug(alarm.as_str())))
    }

    /// Directory for one alarm's artifacts from one recon round
    #[must_use]
    pub fn round_dir(&self, alarm: &AlarmId, round: u32) -> PathBuf {
        self.reports()
            .join("insights")
            .join(slug(alarm.as_str()))
            .join(format!("round-{round}"))
    }

    fn reports(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Pretty JSON, written atomically
    ///
    /// # Errors
    /// `NetHealError::Checkpoint` if the directory or file cannot be written.
    pub fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), NetHealError> {
        let text = serde_json::to_string_pretty(value).map_err(|e| {
            NetHealError::checkpoint(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        self.write_text(path, &text)
    }

    /// # Errors
    /// `NetHealError::Checkpoint` if the directory or file cannot be written.
    pub fn write_text(&self, path: &Path, text: &str) -> Result<(), NetHealError> {
        let dir = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(dir).map_err(|e| NetHealError::checkpoint(dir, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| NetHealError::checkpoint(path, e))?;
        tmp.write_all(text.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| NetHealError::checkpoint(path, e))?;
        tmp.persist(path)
            .map_err(|e| NetHealError::checkpoint(path, e.error))?;
        tracing::debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    /// `Ok(None)` when the file does not exist
    ///
    /// # Errors
    /// `NetHealError::Checkpoint` on read or parse failure.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, NetHealError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(NetHealError::checkpoint(path, e)),
        };
        serde_json::from_str(&text).map(Some).map_err(|e| {
            NetHealError::checkpoint(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

/// File-name-safe form of an id or device name
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
