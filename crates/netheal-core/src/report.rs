//! Initial and final alarm reports
//!
//! Most report fields are answered by the oracle, one key at a time, from
//! the alarm record (initial report) or from a closing narrative (final
//! report). Identity, status, root causes, remediation steps and outcome are
//! filled in locally. A field the oracle cannot answer reads `"unknown"`.

use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use netheal_oracle::OracleClient;

use crate::orchestrator::AlarmRun;
use crate::prompts;
use crate::remediation::render_attempts;
use crate::types::{Alarm, AlarmClass, AlarmId, AlarmState, AlarmStatus, AttemptOutcome};

pub const UNKNOWN: &str = "unknown";

/// Oracle-answered keys of the initial report, with their descriptions
pub const INITIAL_FIELDS: &[(&str, &str)] = &[
    ("Alarm Summary", "A brief description of the alarm."),
    (
        "Device Family",
        "Type of the device generating the alarm, like Router, Switch, Firewall or Linux host.",
    ),
    ("Recommended Actions", "Suggested steps to resolve the alarm."),
    ("Tracking Next Steps", "Follow-up actions to monitor resolution progress."),
    ("Alarm Details", "All other details available in the alarm data."),
    ("Insights", "Any additional findings related to the alarm."),
    (
        "Priority",
        "Priority level of the alarm: 'Urgent', 'Normal' or 'Low'. Resolved alarms are 'Low'.",
    ),
    (
        "Status",
        "Current state of the alarm: 'Resolved' or 'Active'. An alarm that is resolved or only \
         informational is 'Resolved'.",
    ),
];

/// Oracle-answered keys of the final report
pub const FINAL_FIELDS: &[(&str, &str)] = &[
    ("Alarm Summary", "A brief description of the alarm."),
    (
        "Device Family",
        "Type of the device generating the alarm, like Router, Switch, Firewall or Linux host.",
    ),
    ("Recommended Actions", "Suggested steps still open after handling the alarm."),
    ("Tracking Next Steps", "Follow-up actions to monitor the alarm from here."),
    ("Alarm Details", "All other details available in the alarm data."),
    ("Insights", "Key findings from the investigation."),
    ("Priority", "Priority level after handling: 'Urgent', 'Normal' or 'Low'."),
    (
        "Classification",
        "Fault category, e.g. Link Down, Routing, Access Control, Hardware or Informational.",
    ),
    (
        "Additional Insights/Recommendations",
        "Recommendations to prevent the alarm from recurring.",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialReport {
    #[serde(rename = "Alarm Summary")]
    pub alarm_summary: String,
    #[serde(rename = "Device Family")]
    pub device_family: String,
    #[serde(rename = "Recommended Actions")]
    pub recommended_actions: String,
    #[serde(rename = "Tracking Next Steps")]
    pub tracking_next_steps: String,
    #[serde(rename = "Alarm Details")]
    pub alarm_details: String,
    #[serde(rename = "Insights")]
    pub insights: String,
    #[serde(rename = "Priority")]
    pub priority: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Alarm Source")]
    pub alarm_source: String,
    #[serde(rename = "Alarm ID")]
    pub alarm_id: AlarmId,
}

impl InitialReport {
    fn from_fields(alarm: &Alarm, fields: &mut IndexMap<String, String>) -> Self {
        let mut take = |key: &str| fields.shift_remove(key).unwrap_or_else(|| UNKNOWN.to_string());
        Self {
            alarm_summary: take("Alarm Summary"),
            device_family: take("Device Family"),
            recommended_actions: take("Recommended Actions"),
            tracking_next_steps: take("Tracking Next Steps"),
            alarm_details: take("Alarm Details"),
            insights: take("Insights"),
            priority: take("Priority"),
            status: take("Status"),
            alarm_source: alarm.source.clone(),
            alarm_id: alarm.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    #[serde(flatten)]
    pub base: InitialReport,
    #[serde(rename = "Classification")]
    pub classification: String,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Root Cause Analysis")]
    pub root_cause_analysis: Vec<String>,
    #[serde(rename = "Auto-Remediation Steps Taken")]
    pub remediation_steps: Vec<String>,
    #[serde(rename = "Final Outcome")]
    pub final_outcome: String,
    #[serde(rename = "Additional Insights/Recommendations")]
    pub recommendations: String,
}

impl FinalReport {
    /// Report for an alarm that was already resolved at intake
    #[must_use]
    pub fn skipped(initial: &InitialReport) -> Self {
        Self {
            base: initial.clone(),
            classification: "Informational".to_string(),
            reason: "resolved at intake".to_string(),
            root_cause_analysis: Vec::new(),
            remediation_steps: Vec::new(),
            final_outcome: "Resolved at intake; no action taken".to_string(),
            recommendations: UNKNOWN.to_string(),
        }
    }
}

/// Reports file body: `{"Alarms": [..]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFile<T> {
    #[serde(rename = "Alarms")]
    pub alarms: Vec<T>,
}

/// Strips quoting and a leading `key:` echo from a field answer
#[must_use]
pub fn clean_field(key: &str, answer: &str) -> String {
    let mut value = answer.trim();
    if let Some(rest) = value.strip_prefix(key) {
        value = rest.trim_start_matches([' ', ':', '\'', '"']).trim();
    }
    let value = value.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

#[must_use]
pub fn final_outcome(run: &AlarmRun) -> String {
    let applied = run.attempts_applied();
    match run.state {
        AlarmState::Resolved if applied == 0 => format!("Resolved without remediation: {}", run.reason),
        AlarmState::Resolved => format!("Resolved after {applied} remediation attempt(s)"),
        _ => format!("Escalated: {}", run.reason),
    }
}

/// `"<device> (attempt n, outcome): cmd; cmd"` per logged attempt
#[must_use]
pub fn remediation_steps(run: &AlarmRun) -> Vec<String> {
    run.remediations
        .iter()
        .map(|a| {
            let outcome = match a.outcome {
                AttemptOutcome::Succeeded => "succeeded",
                AttemptOutcome::Failed => "failed",
                AttemptOutcome::Partial => "partial",
            };
            format!("{} (attempt {}, {outcome}): {}", a.device, a.attempt, a.commands.join("; "))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    oracle: OracleClient,
}

impl ReportBuilder {
    pub fn new(oracle: OracleClient) -> Self {
        Self { oracle }
    }

    async fn fields(&self, keys: &[(&str, &str)], data: &str) -> IndexMap<String, String> {
        let answers = join_all(keys.iter().map(|(key, description)| {
            let request = prompts::report_field(key, description, data);
            async move {
                match self.oracle.ask(&request).await {
                    Ok(answer) => clean_field(key, &answer),
                    Err(e) => {
                        tracing::warn!(key, error = %e, "report field unavailable");
                        UNKNOWN.to_string()
                    }
                }
            }
        }))
        .await;
        keys.iter()
            .map(|(key, _)| (*key).to_string())
            .zip(answers)
            .collect()
    }

    /// Initial report entry; `Priority` and `Status` also set the alarm's class and status
    pub async fn classify(&self, alarm: Alarm) -> (Alarm, InitialReport) {
        let mut fields = self.fields(INITIAL_FIELDS, &alarm.describe()).await;
        let report = InitialReport::from_fields(&alarm, &mut fields);
        let alarm = alarm
            .with_class(AlarmClass::from_priority(&report.priority))
            .with_status(AlarmStatus::from_label(&report.status));
        tracing::info!(
            alarm = %alarm.id,
            class = ?alarm.class,
            status = alarm.status.as_label(),
            "alarm classified"
        );
        (alarm, report)
    }

    /// Final report entry for a finished run
    pub async fn finalize(&self, run: &AlarmRun, initial: &InitialReport) -> FinalReport {
        let outcome = final_outcome(run);
        let telemetry = run
            .last_sample
            .as_ref()
            .map_or_else(|| "none".to_string(), |s| s.telemetry.render());
        let request = prompts::final_summary(
            &run.alarm.describe(),
            &outcome,
            &run.history.render(),
            &render_attempts(&run.remediations),
            &telemetry,
        );
        let summary = match self.oracle.ask(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(alarm = %run.alarm.id, error = %e, "final summary unavailable");
                format!(
                    "{}\n\nOutcome: {outcome}\n\nRCA history:\n{}",
                    run.alarm.describe(),
                    run.history.render()
                )
            }
        };

        let mut fields = self.fields(FINAL_FIELDS, &summary).await;
        let mut base = InitialReport::from_fields(&run.alarm, &mut fields);
        base.status = match run.state {
            AlarmState::Resolved => AlarmStatus::Resolved,
            _ => AlarmStatus::Active,
        }
        .as_label()
        .to_string();
        let mut take = |key: &str| fields.shift_remove(key).unwrap_or_else(|| UNKNOWN.to_string());
        let classification = take("Classification");
        let recommendations = take("Additional Insights/Recommendations");
        if base.alarm_details == UNKNOWN {
            base.alarm_details.clone_from(&initial.alarm_details);
        }

        FinalReport {
            base,
            classification,
            reason: run.reason.clone(),
            root_cause_analysis: run.history.root_causes().into_iter().map(str::to_string).collect(),
            remediation_steps: remediation_steps(run),
            final_outcome: outcome,
            recommendations,
        }
    }
}
