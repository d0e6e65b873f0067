//! Alarm intake
//!
//! Telemetry probes and JSON alarm files are merged into one combined batch
//! `{label: [payload, ..]}`, checkpointed to `input/combined_alarms.json`, and
//! expanded into [`Alarm`]s numbered per label from 1.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use crate::checkpoint::CheckpointStore;
use crate::error::NetHealError;
use crate::types::{Alarm, Telemetry};

/// Label under which probe readings enter the batch
pub const TELEMETRY_SOURCE: &str = "Ping Result";

pub type CombinedAlarms = IndexMap<String, Vec<Value>>;

/// Probe readings as one alarm payload
#[must_use]
pub fn telemetry_payload(telemetry: &Telemetry) -> Value {
    serde_json::json!({
        "probes": telemetry.readings,
        "taken_at": telemetry.taken_at,
    })
}

/// Merge one parsed alarm file into `combined`
///
/// An object is read as `{label: payloads}`; a bare list is filed under the
/// file stem.
pub fn merge_file(combined: &mut CombinedAlarms, path: &Path, contents: Value) {
    match contents {
        Value::Object(map) => {
            for (label, payloads) in map {
                push_payloads(combined.entry(label).or_default(), payloads);
            }
        }
        other => {
            let label = path
                .file_stem()
                .map_or_else(|| "alarms".to_string(), |s| s.to_string_lossy().into_owned());
            push_payloads(combined.entry(label).or_default(), other);
        }
    }
}

fn push_payloads(into: &mut Vec<Value>, payloads: Value) {
    match payloads {
        Value::Array(items) => into.extend(items),
        Value::Null => {}
        single => into.push(single),
    }
}

/// Read every alarm file, add telemetry, checkpoint the batch
///
/// # Errors
/// `NetHealError::Setup` if an alarm file is missing or not JSON;
/// `NetHealError::Checkpoint` if the batch cannot be written.
pub fn collect(
    store: &CheckpointStore,
    telemetry: Option<&Telemetry>,
    files: &[PathBuf],
) -> Result<CombinedAlarms, NetHealError> {
    let mut combined = CombinedAlarms::new();
    if let Some(telemetry) = telemetry.filter(|t| !t.is_empty()) {
        combined
            .entry(TELEMETRY_SOURCE.to_string())
            .or_default()
            .push(telemetry_payload(telemetry));
    }
    for path in files {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NetHealError::Setup(format!("alarm file {}: {e}", path.display())))?;
        let contents: Value = serde_json::from_str(&text)
            .map_err(|e| NetHealError::Setup(format!("alarm file {} is not JSON: {e}", path.display())))?;
        merge_file(&mut combined, path, contents);
    }

    let total: usize = combined.values().map(Vec::len).sum();
    tracing::info!(sources = combined.len(), alarms = total, stage = "intake", "alarms collected");
    store.write_json(&store.combined_alarms(), &combined)?;
    Ok(combined)
}

/// One [`Alarm`] per payload, ids `"<label> <n>"`
#[must_use]
pub fn alarms_from(combined: &CombinedAlarms) -> Vec<Alarm> {
    combined
        .iter()
        .flat_map(|(label, payloads)| {
            payloads
                .iter()
                .enumerate()
                .map(move |(i, payload)| Alarm::new(label.clone(), i + 1, payload.clone()))
        })
        .collect()
}
