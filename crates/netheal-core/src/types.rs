//! Core data model for the remediation loop
//!
//! Lifecycle summary:
//! - `Alarm`: created at intake, classification/status updated by the orchestrator
//! - `DiagnosticTask`: one per device per recon round, discarded after the round
//! - `Insight`: one per device per round, plus one fleet-wide synthesis
//! - `RcaHypothesis`: one per round, appended to an ordered history
//! - `RemediationAttempt`: one per device per applied plan, append-only
//! - `VerificationSample`: at loop entry and after every remediation

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

use netheal_exec::{BatchOutcome, CommandResult, DeviceKind};

/// `"<source label> <n>"`, unique within one intake batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(pub String);

impl AlarmId {
    #[must_use]
    pub fn new(source: &str, index: usize) -> Self {
        Self(format!("{source} {index}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmClass {
    Urgent,
    #[default]
    Normal,
    Low,
}

impl AlarmClass {
    /// Reads an oracle-supplied priority; anything unrecognised is `Normal`
    #[must_use]
    pub fn from_priority(text: &str) -> Self {
        let text = text.to_ascii_lowercase();
        if text.contains("urgent") || text.contains("critical") {
            Self::Urgent
        } else if text.contains("low") {
            Self::Low
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    #[default]
    Active,
    Resolved,
}

impl AlarmStatus {
    /// Reads an oracle-supplied status; only an unqualified "resolved" counts
    #[must_use]
    pub fn from_label(text: &str) -> Self {
        let text = text.trim().to_ascii_lowercase();
        let negated = text.contains("not") || text.contains("unresolved");
        if text.contains("resolved") && !negated {
            Self::Resolved
        } else {
            Self::Active
        }
    }

    #[must_use]
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Resolved => "Resolved",
        }
    }
}

/// A reported fault condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub source: String,
    /// Opaque record as received
    pub payload: serde_json::Value,
    pub class: AlarmClass,
    pub status: AlarmStatus,
}

impl Alarm {
    /// `index` is 1-based within `source`
    pub fn new(source: impl Into<String>, index: usize, payload: serde_json::Value) -> Self {
        let source = source.into();
        Self {
            id: AlarmId::new(&source, index),
            source,
            payload,
            class: AlarmClass::default(),
            status: AlarmStatus::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_class(mut self, class: AlarmClass) -> Self {
        self.class = class;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: AlarmStatus) -> Self {
        self.status = status;
        self
    }

    /// Text form used in oracle prompts
    #[must_use]
    pub fn describe(&self) -> String {
        let record = serde_json::json!({
            "Alarm ID": self.id,
            "Alarm Source": self.source,
            "Details": self.payload,
        });
        serde_json::to_string_pretty(&record).unwrap_or_else(|_| record.to_string())
    }
}

/// Commands for one device in one recon round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticTask {
    pub device: String,
    pub commands: Vec<String>,
}

/// Natural-language finding about one device (or the whole fleet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DeviceKind>,
    pub finding: String,
}

impl Insight {
    /// Device name used for the cross-device synthesis
    pub const FLEET: &'static str = "fleet";

    pub fn new(device: impl Into<String>, kind: Option<DeviceKind>, finding: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            finding: finding.into(),
        }
    }

    /// Traffic-path entry missing from the registry
    pub fn not_found(device: impl Into<String>) -> Self {
        Self::new(device, None, "device not found in registry; no diagnostics collected")
    }

    pub fn fleet(finding: impl Into<String>) -> Self {
        Self::new(Self::FLEET, None, finding)
    }
}

/// Device name -> ordered command list
///
/// Empty means "no actionable change".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemediationPlan {
    pub steps: IndexMap<String, Vec<String>>,
}

impl RemediationPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(device: impl Into<String>, commands: Vec<String>) -> Self {
        let mut steps = IndexMap::new();
        steps.insert(device.into(), commands);
        Self { steps }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.values().all(Vec::is_empty)
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    #[must_use]
    pub fn command_count(&self) -> usize {
        self.steps.values().map(Vec::len).sum()
    }
}

/// How the hypothesis should be acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RcaVerdict {
    /// Non-empty plan
    Actionable,
    /// Empty plan; the fault has gone away
    ConditionCleared,
    /// Empty plan; nothing to try
    NoRootCause,
}

impl RcaVerdict {
    /// Statement carried in the hypothesis text for empty plans
    #[must_use]
    pub fn statement(self) -> Option<&'static str> {
        match self {
            Self::Actionable => None,
            Self::ConditionCleared => Some("condition no longer present"),
            Self::NoRootCause => Some("no root cause identified"),
        }
    }
}

/// One round's root-cause narrative and plan; never mutated once recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcaHypothesis {
    pub id: Ulid,
    pub round: u32,
    pub root_cause: String,
    pub plan: RemediationPlan,
    pub verdict: RcaVerdict,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Partial,
}

impl AttemptOutcome {
    /// Local classification of one device's batch
    #[must_use]
    pub fn classify(outcome: &BatchOutcome) -> Self {
        let ok = outcome.succeeded_count();
        if ok == outcome.results.len() && outcome.connection_error.is_none() {
            Self::Succeeded
        } else if ok == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }
}

/// One plan applied to one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAttempt {
    /// Hypothesis whose plan was applied
    pub hypothesis: Ulid,
    pub alarm: AlarmId,
    pub attempt: u32,
    pub device: String,
    pub commands: Vec<String>,
    pub results: Vec<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
    pub outcome: AttemptOutcome,
    pub applied_at: DateTime<Utc>,
}

/// One ping probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReading {
    pub probe_host: String,
    pub target: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReading {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && self.loss_percent.is_some_and(|loss| loss <= 0.0)
    }
}

/// Fresh connectivity sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub readings: Vec<ProbeReading>,
    pub taken_at: DateTime<Utc>,
}

impl Telemetry {
    pub fn new(readings: Vec<ProbeReading>) -> Self {
        Self {
            readings,
            taken_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// SHA-256 over the readings; the sampling time is excluded
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for reading in &self.readings {
            hasher.update(reading.probe_host.as_bytes());
            hasher.update([0]);
            hasher.update(reading.target.as_bytes());
            hasher.update([0]);
            hasher.update(reading.output.as_bytes());
            hasher.update([0]);
            if let Some(loss) = reading.loss_percent {
                hasher.update(loss.to_le_bytes());
            }
            hasher.update([0]);
            hasher.update(reading.error.as_deref().unwrap_or_default().as_bytes());
            hasher.update([0xff]);
        }
        hex::encode(hasher.finalize())
    }

    /// Text form used in oracle prompts
    #[must_use]
    pub fn render(&self) -> String {
        if self.readings.is_empty() {
            return "no telemetry probes configured".to_string();
        }
        self.readings
            .iter()
            .map(|r| match &r.error {
                Some(err) => format!("[{} -> {}] error: {err}", r.probe_host, r.target),
                None => format!("[{} -> {}]\n{}", r.probe_host, r.target, r.output.trim()),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Telemetry plus the judgement drawn from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSample {
    pub telemetry: Telemetry,
    pub cleared: bool,
    /// Oracle answer the judgement was read from
    pub rationale: String,
}

/// Orchestrator states for one alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Intake,
    Recon,
    Hypothesize,
    AwaitingConfirmation,
    Remediate,
    Verify,
    Retry,
    Resolved,
    Escalated,
}

impl AlarmState {
    pub const ALL: [Self; 9] = [
        Self::Intake,
        Self::Recon,
        Self::Hypothesize,
        Self::AwaitingConfirmation,
        Self::Remediate,
        Self::Verify,
        Self::Retry,
        Self::Resolved,
        Self::Escalated,
    ];

    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::Recon => "RECON",
            Self::Hypothesize => "HYPOTHESIZE",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            Self::Remediate => "REMEDIATE",
            Self::Verify => "VERIFY",
            Self::Retry => "RETRY",
            Self::Resolved => "RESOLVED",
            Self::Escalated => "ESCALATED",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reading(loss: Option<f32>) -> ProbeReading {
        ProbeReading {
            probe_host: "host".into(),
            target: "10.10.10.2".into(),
            output: "4 packets transmitted".into(),
            loss_percent: loss,
            error: None,
        }
    }

    #[test]
    fn test_telemetry_digest_ignores_sampling_time() {
        let a = Telemetry::new(vec![reading(Some(100.0))]);
        let mut b = Telemetry::new(vec![reading(Some(100.0))]);
        b.taken_at = a.taken_at + chrono::Duration::seconds(30);
        assert_eq!(a.digest(), b.digest());

        let c = Telemetry::new(vec![reading(Some(0.0))]);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_alarm_status_negation() {
        assert_eq!(AlarmStatus::from_label("Resolved"), AlarmStatus::Resolved);
        assert_eq!(AlarmStatus::from_label("not resolved"), AlarmStatus::Active);
        assert_eq!(AlarmStatus::from_label("Unresolved"), AlarmStatus::Active);
        assert_eq!(AlarmStatus::from_label("Active"), AlarmStatus::Active);
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(AlarmClass::from_priority("Urgent"), AlarmClass::Urgent);
        assert_eq!(AlarmClass::from_priority("low"), AlarmClass::Low);
        assert_eq!(AlarmClass::from_priority("unknown"), AlarmClass::Normal);
    }

    #[test]
    fn test_attempt_outcome_classification() {
        let ok = CommandResult::completed("no shutdown", "", None, Some(0));
        let bad = CommandResult::failed("exit", "connection error: reset");
        let outcome = |results: Vec<CommandResult>| BatchOutcome {
            device: "router".into(),
            results,
            connection_error: None,
        };

        assert_eq!(AttemptOutcome::classify(&outcome(vec![ok.clone()])), AttemptOutcome::Succeeded);
        assert_eq!(
            AttemptOutcome::classify(&outcome(vec![ok, bad.clone()])),
            AttemptOutcome::Partial
        );
        assert_eq!(AttemptOutcome::classify(&outcome(vec![bad])), AttemptOutcome::Failed);
    }

    #[test]
    fn test_plan_with_only_empty_lists_is_empty() {
        let plan = RemediationPlan::single("router", Vec::new());
        assert!(plan.is_empty());
        assert_eq!(plan.command_count(), 0);
    }

    #[test]
    fn test_healthy_reading_requires_zero_loss() {
        assert!(reading(Some(0.0)).is_healthy());
        assert!(!reading(Some(25.0)).is_healthy());
        assert!(!reading(None).is_healthy());
    }
}
