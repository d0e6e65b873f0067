//! Root-cause analysis
//!
//! Two oracle steps per round: a free-text narrative (checkpointed), then a
//! structured extraction of the per-device plan from that narrative. The
//! extracted plan is then held to the remediation rules locally:
//! - read-only commands are removed
//! - default routes and management interfaces are left alone unless the
//!   narrative blames the management plane
//! - only one device's change is kept (the one with the most commands)
//!
//! The no-repeat rule is enforced here too: a narrative identical to an
//! earlier root cause is re-asked once, then rejected.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use netheal_exec::{parse_sleep, DeviceRegistry};

use crate::commands::{
    closes_block, is_default_route_change, is_read_only, names_management_plane,
    opens_management_interface, targets_management_device,
};
use crate::error::NetHealError;
use crate::insight::render_insights;
use crate::prompts::{self, AlarmContext};
use crate::recon::ReconReport;
use crate::services::Services;
use crate::types::{AlarmId, RcaHypothesis, RcaVerdict, RemediationPlan, Telemetry};

const CLEARED_PHRASES: &[&str] = &[
    "condition no longer present",
    "no longer present",
    "already resolved",
    "has been resolved",
    "issue is resolved",
    "alarm has cleared",
    "condition has cleared",
];

const NO_CAUSE_PHRASES: &[&str] = &["no root cause identified", "no root cause found"];

/// Lines that frame a change without making one
const STRUCTURAL: &[&str] = &[
    "configure terminal",
    "conf t",
    "end",
    "exit",
    "write memory",
    "wr",
    "copy running-config startup-config",
    "copy run start",
];

/// Ordered, append-only list of hypotheses for one alarm
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RcaHistory {
    entries: Vec<RcaHypothesis>,
}

impl RcaHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte-identical root cause already recorded
    #[must_use]
    pub fn contains(&self, root_cause: &str) -> bool {
        self.entries.iter().any(|h| h.root_cause == root_cause)
    }

    /// # Errors
    /// `NetHealError::DuplicateHypothesis` if the root cause was seen before;
    /// the history is unchanged.
    pub fn record(&mut self, hypothesis: RcaHypothesis) -> Result<(), NetHealError> {
        if self.contains(&hypothesis.root_cause) {
            return Err(NetHealError::DuplicateHypothesis);
        }
        self.entries.push(hypothesis);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&RcaHypothesis> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RcaHypothesis> {
        self.entries.iter()
    }

    #[must_use]
    pub fn root_causes(&self) -> Vec<&str> {
        self.entries.iter().map(|h| h.root_cause.as_str()).collect()
    }

    /// Text form used in prompts and reports
    #[must_use]
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "none".to_string();
        }
        self.entries
            .iter()
            .map(|h| {
                let plan = serde_json::to_string(&h.plan).unwrap_or_default();
                format!("Round {}: {}\nPlan: {plan}", h.round, h.root_cause)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Per-device command lists from an extraction answer
///
/// Accepts `{"commands": {device: [..]}}`, `{"commands": [{"device", "commands"}]}`
/// and a flat `{device: [..]}` map. `{"status": "Null"}` is an empty plan.
#[must_use]
pub fn parse_plan(value: &Value) -> RemediationPlan {
    let mut plan = RemediationPlan::new();
    let Value::Object(map) = value else {
        return plan;
    };
    let null_status = map
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("null"));

    match map.get("commands") {
        Some(Value::Object(devices)) => {
            for (device, commands) in devices {
                insert_commands(&mut plan, device, commands);
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                if let Some(device) = entry.get("device").and_then(Value::as_str) {
                    if let Some(commands) = entry.get("commands") {
                        insert_commands(&mut plan, device, commands);
                    }
                }
            }
        }
        Some(_) => {}
        None if null_status => {}
        None => {
            for (device, commands) in map {
                if device != "status" {
                    insert_commands(&mut plan, device, commands);
                }
            }
        }
    }
    plan
}

fn insert_commands(plan: &mut RemediationPlan, device: &str, commands: &Value) {
    let list: Vec<String> = match commands {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        Value::String(text) => text
            .lines()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    if !list.is_empty() {
        plan.steps.entry(device.trim().to_string()).or_default().extend(list);
    }
}

fn is_structural(command: &str) -> bool {
    let text = command.trim().to_ascii_lowercase();
    STRUCTURAL.contains(&text.as_str()) || parse_sleep(&text).is_some()
}

/// Commands that actually change something
#[must_use]
pub fn effective_commands(commands: &[String]) -> usize {
    commands.iter().filter(|c| !is_structural(c)).count()
}

/// Remove commands one device's plan may not contain
///
/// Returns the kept commands and the removed ones.
#[must_use]
pub fn filter_commands(commands: &[String], management_allowed: bool) -> (Vec<String>, Vec<String>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    let mut in_mgmt_block = false;
    for command in commands {
        if in_mgmt_block {
            if closes_block(command) {
                in_mgmt_block = false;
                if !command.trim().to_ascii_lowercase().starts_with("interface ") {
                    dropped.push(command.clone());
                    continue;
                }
            } else {
                dropped.push(command.clone());
                continue;
            }
        }
        let guarded = !management_allowed
            && (is_default_route_change(command) || targets_management_device(command));
        if !management_allowed && opens_management_interface(command) {
            in_mgmt_block = true;
            dropped.push(command.clone());
        } else if guarded || (is_read_only(command) && parse_sleep(command).is_none()) {
            dropped.push(command.clone());
        } else {
            kept.push(command.clone());
        }
    }
    (kept, dropped)
}

/// Hold an extracted plan to the remediation rules
#[must_use]
pub fn enforce_plan(plan: RemediationPlan, narrative: &str, registry: &DeviceRegistry) -> RemediationPlan {
    let management_allowed = names_management_plane(narrative);
    let mut best: Option<(String, Vec<String>, usize)> = None;

    for (device, commands) in plan.steps {
        if !registry.contains(&device) {
            tracing::warn!(device = %device, "plan targets a device missing from the registry");
            continue;
        }
        let (kept, dropped) = filter_commands(&commands, management_allowed);
        if !dropped.is_empty() {
            tracing::warn!(device = %device, ?dropped, "commands removed from remediation plan");
        }
        let weight = effective_commands(&kept);
        if weight == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |(_, _, w)| weight > *w) {
            if let Some((skipped, _, _)) = &best {
                tracing::info!(device = %skipped, "independent change dropped; one change per hypothesis");
            }
            best = Some((device, kept, weight));
        } else {
            tracing::info!(device = %device, "independent change dropped; one change per hypothesis");
        }
    }

    best.map_or_else(RemediationPlan::new, |(device, commands, _)| {
        RemediationPlan::single(device, commands)
    })
}

/// Verdict for an empty plan, read from the narrative
#[must_use]
pub fn empty_plan_verdict(narrative: &str) -> RcaVerdict {
    let text = narrative.to_ascii_lowercase();
    if NO_CAUSE_PHRASES.iter().any(|p| text.contains(p)) {
        RcaVerdict::NoRootCause
    } else if CLEARED_PHRASES.iter().any(|p| text.contains(p)) {
        RcaVerdict::ConditionCleared
    } else {
        RcaVerdict::NoRootCause
    }
}

/// Inputs for one hypothesis round
#[derive(Debug, Clone, Copy)]
pub struct RcaRound<'a> {
    pub alarm: &'a AlarmId,
    pub round: u32,
    pub ctx: &'a AlarmContext,
    pub recon: &'a ReconReport,
    pub telemetry: &'a Telemetry,
    pub history: &'a RcaHistory,
}

#[derive(Debug, Clone)]
pub struct RcaGenerator {
    services: Services,
}

impl RcaGenerator {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// One hypothesis; the caller records it in the history
    ///
    /// # Errors
    /// - `NetHealError::Oracle` when either oracle step fails
    /// - `NetHealError::DuplicateHypothesis` when the re-ask repeats a root cause too
    pub async fn generate(&self, input: RcaRound<'_>) -> Result<RcaHypothesis, NetHealError> {
        let narrative = self.narrative(input).await?;
        let path = self.services.checkpoints.rca_narrative(input.alarm);
        if let Err(e) = self.services.checkpoints.write_text(&path, &narrative) {
            tracing::error!(alarm = %input.alarm, error = %e, "RCA narrative not checkpointed");
        }

        let extracted = self
            .services
            .oracle
            .ask_json(prompts::rca_extraction(&narrative))
            .await?;
        let plan = enforce_plan(parse_plan(&extracted), &narrative, &self.services.registry);

        let (verdict, root_cause) = if plan.is_empty() {
            let verdict = empty_plan_verdict(&narrative);
            let statement = verdict.statement().unwrap_or_default();
            let text = if narrative.to_ascii_lowercase().contains(statement) {
                narrative
            } else {
                format!("{statement}: {narrative}")
            };
            (verdict, text)
        } else {
            (RcaVerdict::Actionable, narrative)
        };

        tracing::info!(
            alarm = %input.alarm,
            round = input.round,
            verdict = ?verdict,
            commands = plan.command_count(),
            "hypothesis formed"
        );
        Ok(RcaHypothesis {
            id: Ulid::new(),
            round: input.round,
            root_cause,
            plan,
            verdict,
            generated_at: Utc::now(),
        })
    }

    async fn narrative(&self, input: RcaRound<'_>) -> Result<String, NetHealError> {
        let per_device = render_insights(&input.recon.insights);
        let telemetry = input.telemetry.render();
        let prior = input.history.root_causes();

        for repeated in [false, true] {
            let request = prompts::rca_narrative(
                input.ctx,
                &input.recon.fleet.finding,
                &per_device,
                &telemetry,
                &prior,
                repeated,
            );
            let narrative = self.services.oracle.ask(&request).await?.trim().to_string();
            if !input.history.contains(&narrative) {
                return Ok(narrative);
            }
            tracing::warn!(alarm = %input.alarm, round = input.round, "oracle repeated an earlier root cause");
        }
        Err(NetHealError::DuplicateHypothesis)
    }
}
