use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::checkpoint::CheckpointStore;
use crate::error::NetHealError;
use crate::types::RemediationAttempt;

const GENESIS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remediation log chain broken at entry {seq}")]
pub struct IntegrityViolation {
    pub seq: u64,
}

/// One remediation attempt as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub attempt: RemediationAttempt,
    pub prev_hash: String,
    pub hash: String,
}

/// Append-only remediation log with a SHA-256 chain
///
/// The whole array is rewritten atomically on every append, so the file on
/// disk always matches the in-memory chain.
#[derive(Debug)]
pub struct RemediationLog {
    store: Arc<CheckpointStore>,
    path: PathBuf,
    inner: Mutex<Vec<LogEntry>>,
}

impl RemediationLog {
    /// Continue the chain already on disk, if any
    ///
    /// # Errors
    /// `NetHealError::Checkpoint` if the existing file cannot be read.
    pub fn open(store: Arc<CheckpointStore>) -> Result<Self, NetHealError> {
        let path = store.remediation_log();
        let entries: Vec<LogEntry> = store.read_json(&path)?.unwrap_or_default();
        Ok(Self {
            store,
            path,
            inner: Mutex::new(entries),
        })
    }

    /// # Errors
    /// `NetHealError::Checkpoint` if the log cannot be persisted; the entry
    /// is then not kept in memory either.
    pub fn append(&self, attempt: RemediationAttempt) -> Result<LogEntry, NetHealError> {
        let mut guard = self.inner.lock();
        let (seq, prev_hash) = guard
            .last()
            .map_or((0, GENESIS.to_string()), |e| (e.seq + 1, e.hash.clone()));
        let mut entry = LogEntry {
            seq,
            timestamp: Utc::now(),
            attempt,
            prev_hash,
            hash: String::new(),
        };
        entry.hash = compute_hash(&entry);
        guard.push(entry.clone());

        if let Err(e) = self.store.write_json(&self.path, guard.as_slice()) {
            guard.pop();
            return Err(e);
        }
        tracing::info!(
            seq,
            device = %entry.attempt.device,
            outcome = ?entry.attempt.outcome,
            "remediation attempt logged"
        );
        Ok(entry)
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().clone()
    }

    /// # Errors
    /// `IntegrityViolation` naming the first entry whose links do not hold.
    pub fn verify_integrity(&self) -> Result<(), IntegrityViolation> {
        verify_chain(&self.inner.lock())
    }
}

/// # Errors
/// `IntegrityViolation` naming the first entry whose links do not hold.
pub fn verify_chain(entries: &[LogEntry]) -> Result<(), IntegrityViolation> {
    let mut prev = GENESIS.to_string();
    for e in entries {
        if e.prev_hash != prev || e.hash != compute_hash(e) {
            return Err(IntegrityViolation { seq: e.seq });
        }
        prev.clone_from(&e.hash);
    }
    Ok(())
}

fn compute_hash(entry: &LogEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.timestamp.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(&entry.attempt).unwrap_or_default());
    hasher.update([0]);
    hasher.update(entry.prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlarmId, AttemptOutcome};
    use netheal_exec::CommandResult;
    use ulid::Ulid;

    fn attempt(device: &str) -> RemediationAttempt {
        RemediationAttempt {
            hypothesis: Ulid::new(),
            alarm: AlarmId::new("Ping Result", 1),
            attempt: 1,
            device: device.into(),
            commands: vec!["no shutdown".into()],
            results: vec![CommandResult::completed("no shutdown", "", None, Some(0))],
            connection_error: None,
            outcome: AttemptOutcome::Succeeded,
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_chain_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));

        let log = RemediationLog::open(Arc::clone(&store)).unwrap();
        log.append(attempt("router")).unwrap();
        log.append(attempt("switch")).unwrap();

        let reopened = RemediationLog::open(store).unwrap();
        let third = reopened.append(attempt("host")).unwrap();
        assert_eq!(third.seq, 2);
        assert_eq!(reopened.entries().len(), 3);
        assert!(reopened.verify_integrity().is_ok());
    }

    #[test]
    fn test_tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let log = RemediationLog::open(Arc::clone(&store)).unwrap();
        log.append(attempt("router")).unwrap();
        log.append(attempt("switch")).unwrap();

        let mut entries = log.entries();
        entries[0].attempt.commands = vec!["reload".into()];
        assert_eq!(verify_chain(&entries), Err(IntegrityViolation { seq: 0 }));
    }

    #[test]
    fn test_persisted_file_is_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path()));
        let log = RemediationLog::open(Arc::clone(&store)).unwrap();
        log.append(attempt("router")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.remediation_log()).unwrap()).unwrap();
        assert_eq!(raw[0]["device"], "router");
        assert_eq!(raw[0]["commands"][0], "no shutdown");
        assert_eq!(raw[0]["prev_hash"], GENESIS);
    }
}
