//! Reconnaissance
//!
//! One round:
//! 1. resolve the alarm's traffic path (static, or asked of the oracle)
//! 2. per device, concurrently: plan read-only diagnostics, run them, and
//!    synthesize a device insight
//! 3. synthesize the fleet insight
//!
//! Command results and insight text are checkpointed per device per round.

use std::sync::Arc;

use indexmap::IndexSet;
use serde_json::Value;

use netheal_exec::{BatchOutcome, DeviceDescriptor, DeviceKind};

use crate::commands::{is_read_only, parse_command_list};
use crate::dispatch::fan_out;
use crate::insight::InsightSynthesizer;
use crate::prompts::{self, AlarmContext};
use crate::services::Services;
use crate::types::{AlarmId, DiagnosticTask, Insight};

/// Built-in diagnostics used when the oracle cannot plan any
#[must_use]
pub fn default_diagnostics(kind: DeviceKind) -> Vec<String> {
    let commands: &[&str] = match kind {
        DeviceKind::NetworkIos => &[
            "show ip interface brief",
            "show ip route",
            "show interfaces",
            "show cdp neighbors",
        ],
        DeviceKind::NetworkAsa => &[
            "show interface ip brief",
            "show route",
            "show nat",
            "show access-list",
        ],
        DeviceKind::NetworkSwitch => &[
            "show interfaces status",
            "show vlan brief",
            "show mac address-table",
            "show spanning-tree summary",
        ],
        DeviceKind::LinuxHost => &["ip addr", "ip route", "ip link"],
    };
    commands.iter().map(|c| (*c).to_string()).collect()
}

/// Device names from a traffic-path answer
///
/// Accepts `{"traffic-path": [..]}`, a string-encoded list, a bare array, or
/// `"none"`. Order is kept and duplicates dropped.
#[must_use]
pub fn parse_traffic_path(value: &Value) -> Vec<String> {
    let field = value
        .get("traffic-path")
        .or_else(|| value.get("traffic_path"))
        .unwrap_or(value);
    let names: Vec<String> = match field {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(text) => {
            let text = text.trim();
            if text.eq_ignore_ascii_case("none") {
                Vec::new()
            } else if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            } else {
                text.trim_matches(|c: char| c == '[' || c == ']')
                    .split(',')
                    .map(|n| n.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string())
                    .collect()
            }
        }
        _ => Vec::new(),
    };
    let unique: IndexSet<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    unique.into_iter().collect()
}

/// Everything one recon round produced
#[derive(Debug, Clone)]
pub struct ReconReport {
    pub tasks: Vec<DiagnosticTask>,
    pub outcomes: Vec<BatchOutcome>,
    /// One per traffic-path entry, in path order
    pub insights: Vec<Insight>,
    pub fleet: Insight,
}

struct DeviceRound {
    task: Option<DiagnosticTask>,
    outcome: Option<BatchOutcome>,
    insight: Insight,
}

#[derive(Debug, Clone)]
pub struct Recon {
    services: Services,
    synthesizer: InsightSynthesizer,
    static_path: Option<Vec<String>>,
}

impl Recon {
    pub fn new(services: Services) -> Self {
        Self {
            synthesizer: InsightSynthesizer::new(services.clone()),
            services,
            static_path: None,
        }
    }

    #[must_use]
    pub fn with_static_path(mut self, path: Option<Vec<String>>) -> Self {
        self.static_path = path;
        self
    }

    /// Devices relevant to the alarm
    ///
    /// Falls back to the whole registry when the oracle cannot answer.
    pub async fn resolve_path(&self, alarm: &str, topology: &str) -> Vec<String> {
        if let Some(path) = &self.static_path {
            return path.clone();
        }
        match self
            .services
            .oracle
            .ask_json(prompts::traffic_path(alarm, topology))
            .await
        {
            Ok(value) => parse_traffic_path(&value),
            Err(e) => {
                tracing::warn!(error = %e, "traffic path unavailable; diagnosing every registry device");
                self.services.registry.names().map(str::to_string).collect()
            }
        }
    }

    /// Read-only diagnostics for one device
    pub async fn plan_commands(&self, device: &DeviceDescriptor, ctx: &AlarmContext) -> Vec<String> {
        plan_commands(&self.services, device, ctx).await
    }

    pub async fn run(&self, alarm: &AlarmId, round: u32, ctx: &AlarmContext) -> ReconReport {
        tracing::info!(alarm = %alarm, round, stage = "recon", devices = ctx.traffic_path.len(), "reconnaissance");
        let items: Vec<(String, String)> = ctx
            .traffic_path
            .iter()
            .map(|name| (name.clone(), name.clone()))
            .collect();

        let services = self.services.clone();
        let synthesizer = self.synthesizer.clone();
        let shared = Arc::new(ctx.clone());
        let alarm_id = alarm.clone();
        let rounds = fan_out(items, Some(self.services.fleet_cap), move |name| {
            let services = services.clone();
            let synthesizer = synthesizer.clone();
            let ctx = Arc::clone(&shared);
            let alarm = alarm_id.clone();
            async move { recon_device(&services, &synthesizer, &name, &ctx, &alarm, round).await }
        })
        .await;

        let mut report = ReconReport {
            tasks: Vec::new(),
            outcomes: Vec::new(),
            insights: Vec::new(),
            fleet: Insight::fleet(""),
        };
        for (name, joined) in rounds {
            match joined {
                Ok(device_round) => {
                    report.tasks.extend(device_round.task);
                    report.outcomes.extend(device_round.outcome);
                    report.insights.push(device_round.insight);
                }
                Err(failure) => {
                    tracing::error!(device = %name, error = %failure, "diagnostics task failed");
                    report
                        .insights
                        .push(Insight::new(name, None, format!("error: diagnostics failed ({failure})")));
                }
            }
        }
        report.fleet = self.synthesizer.summarize_fleet(&report.insights, ctx).await;
        report
    }
}

async fn plan_commands(services: &Services, device: &DeviceDescriptor, ctx: &AlarmContext) -> Vec<String> {
    let planned = match services
        .oracle
        .ask(&prompts::diagnostic_commands(device, ctx))
        .await
    {
        Ok(text) => parse_command_list(&text),
        Err(e) => {
            tracing::warn!(device = %device.name, error = %e, "diagnostic planning unavailable");
            Vec::new()
        }
    };
    let (kept, dropped): (Vec<String>, Vec<String>) = planned.into_iter().partition(|c| is_read_only(c));
    if !dropped.is_empty() {
        tracing::warn!(device = %device.name, ?dropped, "state-changing commands removed from diagnostics");
    }
    if kept.is_empty() {
        default_diagnostics(device.kind)
    } else {
        kept
    }
}

async fn recon_device(
    services: &Services,
    synthesizer: &InsightSynthesizer,
    name: &str,
    ctx: &AlarmContext,
    alarm: &AlarmId,
    round: u32,
) -> DeviceRound {
    let device = match services.registry.lookup(name) {
        Ok(device) => device.clone(),
        Err(e) => {
            tracing::warn!(device = %name, error = %e, "traffic path names an unknown device");
            return DeviceRound {
                task: None,
                outcome: None,
                insight: Insight::not_found(name),
            };
        }
    };

    let commands = plan_commands(services, &device, ctx).await;
    tracing::debug!(device = %device.name, ?commands, "diagnostics planned");
    let outcome = services
        .executor
        .run(&device, &commands, services.timeouts)
        .await;

    let dir = services.checkpoints.round_dir(alarm, round);
    let file = crate::checkpoint::slug(&device.name);
    if let Err(e) = services
        .checkpoints
        .write_json(&dir.join("command_results").join(format!("{file}.json")), &outcome)
    {
        tracing::error!(device = %device.name, error = %e, "command results not checkpointed");
    }

    let summary = synthesizer.summarize_device(&device, &outcome.results, ctx).await;
    let writes = [
        (dir.join("detailed").join(format!("{file}.txt")), summary.detailed.join("\n")),
        (dir.join("summary").join(format!("{file}.txt")), summary.insight.finding.clone()),
    ];
    for (path, text) in writes {
        if let Err(e) = services.checkpoints.write_text(&path, &text) {
            tracing::error!(device = %device.name, error = %e, "insight not checkpointed");
        }
    }

    DeviceRound {
        task: Some(DiagnosticTask {
            device: device.name.clone(),
            commands,
        }),
        outcome: Some(outcome),
        insight: summary.insight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_traffic_path_shapes() {
        assert_eq!(
            parse_traffic_path(&json!({"traffic-path": ["router", "switch", "router"]})),
            vec!["router", "switch"]
        );
        assert_eq!(
            parse_traffic_path(&json!({"traffic-path": "[\"router\", \"host\"]"})),
            vec!["router", "host"]
        );
        assert_eq!(
            parse_traffic_path(&json!({"traffic-path": "router, 'host'"})),
            vec!["router", "host"]
        );
        assert!(parse_traffic_path(&json!({"traffic-path": "none"})).is_empty());
        assert_eq!(parse_traffic_path(&json!(["firewall"])), vec!["firewall"]);
        assert!(parse_traffic_path(&json!({"status": "Null"})).is_empty());
    }

    #[test]
    fn test_default_diagnostics_are_read_only() {
        for kind in DeviceKind::ALL {
            let commands = default_diagnostics(kind);
            assert!(!commands.is_empty());
            assert!(commands.iter().all(|c| is_read_only(c)), "{kind}");
        }
    }
}
