//! Oracle prompts
//!
//! Each builder opens with a fixed phrase (the `*_MARKER` constants) that no
//! other prompt contains; logs and scripted test backends key on them.
//! Prompt text is the only place wording lives: the loop reads answers only
//! through the shapes documented on each builder.

use netheal_exec::DeviceDescriptor;
use netheal_oracle::OracleRequest;

pub const DIAGNOSTICS_MARKER: &str = "Generate critical diagnostic commands";
pub const TRAFFIC_PATH_MARKER: &str = "identify all the devices in the traffic path";
pub const COMMAND_INSIGHT_MARKER: &str = "Analyze the following command result";
pub const DEVICE_SUMMARY_MARKER: &str = "Insight List:";
pub const FLEET_SUMMARY_MARKER: &str = "Device Insights:";
pub const RCA_MARKER: &str = "generate a concise RCA summary";
pub const EXTRACTION_MARKER: &str = "provide the structured JSON output of commands by device";
pub const VERIFY_MARKER: &str = "Latest telemetry result";
pub const REPORT_FIELD_MARKER: &str = "derive the value for the key";
pub const FINAL_SUMMARY_MARKER: &str = "Write a final summary";

/// Context shared by every prompt about one alarm in one round
#[derive(Debug, Clone, Default)]
pub struct AlarmContext {
    pub alarm: String,
    pub traffic_path: Vec<String>,
    pub topology: String,
    /// Earlier root causes and remediation results, already rendered
    pub history: String,
}

impl AlarmContext {
    fn path_line(&self) -> String {
        if self.traffic_path.is_empty() {
            "unknown".to_string()
        } else {
            self.traffic_path.join(" -> ")
        }
    }
}

/// Answer: comma-separated command list
#[must_use]
pub fn diagnostic_commands(device: &DeviceDescriptor, ctx: &AlarmContext) -> OracleRequest {
    let mut text = format!(
        "{DIAGNOSTICS_MARKER} for device '{}' of type '{}' to troubleshoot the alarm below.\n\
         Only read-only show/diagnostic commands, never configuration changes.\n\
         Return the commands as one comma-separated list with no other text.\n\n\
         Alarm:\n{}\n\nTraffic path: {}\n\nTopology:\n{}",
        device.name,
        device.kind,
        ctx.alarm,
        ctx.path_line(),
        ctx.topology,
    );
    if !ctx.history.is_empty() {
        text.push_str("\n\nHistory so far:\n");
        text.push_str(&ctx.history);
    }
    OracleRequest::prompt(text)
}

/// Answer: `{"traffic-path": [..]}` or `{"traffic-path": "none"}`
#[must_use]
pub fn traffic_path(alarm: &str, topology: &str) -> OracleRequest {
    OracleRequest::prompt(format!(
        "Using the L3 topology and the alarm below, {TRAFFIC_PATH_MARKER} relevant to this alarm.\n\
         Respond with JSON {{\"traffic-path\": [\"<device>\", ...]}} using device names exactly \
         as they appear in the topology, or {{\"traffic-path\": \"none\"}} if no device is involved.\n\n\
         Alarm:\n{alarm}\n\nTopology:\n{topology}"
    ))
}

/// Answer: one short finding
#[must_use]
pub fn command_insight(device: &DeviceDescriptor, command: &str, output: &str, alarm: &str) -> OracleRequest {
    OracleRequest::prompt(format!(
        "{COMMAND_INSIGHT_MARKER} from device '{}' ({}) in the context of the alarm.\n\
         Command: {command}\nOutput:\n{output}\n\nAlarm:\n{alarm}\n\n\
         Give one short finding about what this output shows.",
        device.name, device.kind,
    ))
    .with_system(
        "You are a Network Insights Analyst. You read raw device output and state \
         plainly what it reveals about the fault.",
    )
}

/// Answer: one merged insight for the device
#[must_use]
pub fn device_summary(device: &str, findings: &[String]) -> OracleRequest {
    let list = findings
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    OracleRequest::prompt(format!(
        "Combine the per-command findings for device '{device}' into one concise insight.\n\
         {DEVICE_SUMMARY_MARKER}\n{list}"
    ))
    .with_system("You are an expert Network Insight Analyzer.")
}

/// Answer: one cross-device insight
#[must_use]
pub fn fleet_summary(per_device: &str, ctx: &AlarmContext) -> OracleRequest {
    OracleRequest::prompt(format!(
        "Synthesize the device findings below into one cross-device insight for the alarm.\n\n\
         Alarm:\n{}\n\nTraffic path: {}\n\n{FLEET_SUMMARY_MARKER}\n{per_device}",
        ctx.alarm,
        ctx.path_line(),
    ))
    .with_system("You are an expert Network Insight Analyzer.")
}

/// Answer: free-text RCA narrative
///
/// `prior` lists root causes already tried; `repeated` adds an explicit
/// warning after the oracle repeated one.
#[must_use]
pub fn rca_narrative(
    ctx: &AlarmContext,
    fleet: &str,
    per_device: &str,
    telemetry: &str,
    prior: &[&str],
    repeated: bool,
) -> OracleRequest {
    let mut text = format!(
        "Perform a root cause analysis and {RCA_MARKER} for the alarm below.\n\
         Rules:\n\
         - Remediation commands must change state; never include show or other diagnostic commands.\n\
         - Do not change management-plane default routes or management interfaces unless the \
         management plane itself is the root cause.\n\
         - Propose exactly one atomic change on one device.\n\
         - If the fault is gone, say \"condition no longer present\" and propose no commands.\n\
         - If no cause can be found, say \"no root cause identified\" and propose no commands.\n\
         - End with the remediation commands as JSON mapping device name to a command list.\n\n\
         Alarm:\n{}\n\nTraffic path: {}\n\nTopology:\n{}\n\nCurrent telemetry:\n{telemetry}\n\n\
         Fleet insight:\n{fleet}\n\nPer-device insights:\n{per_device}",
        ctx.alarm,
        ctx.path_line(),
        ctx.topology,
    );
    if !ctx.history.is_empty() {
        text.push_str("\n\nRemediation history:\n");
        text.push_str(&ctx.history);
    }
    if !prior.is_empty() {
        text.push_str("\n\nRoot causes already tried; do not repeat any of them:\n");
        for cause in prior {
            text.push_str("- ");
            text.push_str(cause);
            text.push('\n');
        }
    }
    if repeated {
        text.push_str(
            "\nYour previous answer repeated one of the root causes above. \
             Give a different root cause.",
        );
    }
    OracleRequest::prompt(text)
}

/// Answer: `{"commands": {"<device>": [..]}}` or `{"status": "Null"}`
#[must_use]
pub fn rca_extraction(narrative: &str) -> OracleRequest {
    OracleRequest::prompt(format!(
        "From the RCA below, {EXTRACTION_MARKER}.\n\
         Respond with JSON {{\"commands\": {{\"<device>\": [\"<command>\", ...]}}}}.\n\
         If the RCA proposes no commands respond with {{\"status\": \"Null\"}}.\n\n\
         RCA:\n{narrative}"
    ))
}

/// Answer: exactly `Resolved` or `not-Resolved`
#[must_use]
pub fn verify(alarm: &str, telemetry: &str) -> OracleRequest {
    OracleRequest::prompt(format!(
        "Decide whether the alarm below is still present.\n\
         The latest telemetry outweighs any earlier command output or history when they disagree.\n\
         Answer with exactly one word: 'Resolved' or 'not-Resolved'.\n\n\
         Alarm:\n{alarm}\n\n{VERIFY_MARKER}:\n{telemetry}"
    ))
}

/// Answer: the bare value for `key`
#[must_use]
pub fn report_field(key: &str, description: &str, data: &str) -> OracleRequest {
    OracleRequest::prompt(format!(
        "Analyze the given Alarm data carefully and {REPORT_FIELD_MARKER} : '{key}' based on \
         the description: {description}\nOutput only the extracted value.\n\nAlarm data:\n{data}"
    ))
}

/// Answer: free-text closing narrative
#[must_use]
pub fn final_summary(
    alarm: &str,
    outcome: &str,
    history: &str,
    remediation: &str,
    telemetry: &str,
) -> OracleRequest {
    OracleRequest::prompt(format!(
        "{FINAL_SUMMARY_MARKER} of how the alarm below was handled, covering the root causes \
         considered, the remediation applied and the final state.\n\n\
         Alarm:\n{alarm}\n\nOutcome: {outcome}\n\nRCA history:\n{history}\n\n\
         Remediation results:\n{remediation}\n\nTelemetry at close:\n{telemetry}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netheal_exec::DeviceKind;

    fn ctx() -> AlarmContext {
        AlarmContext {
            alarm: "100% packet loss to 10.10.10.2".into(),
            traffic_path: vec!["router".into(), "host".into()],
            topology: "{}".into(),
            history: String::new(),
        }
    }

    #[test]
    fn test_markers_do_not_leak_between_prompts() {
        let device = DeviceDescriptor::new("router", DeviceKind::NetworkIos, "192.0.2.1");
        let prompts = [
            (DIAGNOSTICS_MARKER, diagnostic_commands(&device, &ctx())),
            (TRAFFIC_PATH_MARKER, traffic_path("a", "b")),
            (COMMAND_INSIGHT_MARKER, command_insight(&device, "show ip route", "", "a")),
            (DEVICE_SUMMARY_MARKER, device_summary("router", &["x".into()])),
            (FLEET_SUMMARY_MARKER, fleet_summary("x", &ctx())),
            (RCA_MARKER, rca_narrative(&ctx(), "f", "d", "t", &["old"], true)),
            (EXTRACTION_MARKER, rca_extraction("n")),
            (VERIFY_MARKER, verify("a", "t")),
            (REPORT_FIELD_MARKER, report_field("Status", "d", "a")),
            (FINAL_SUMMARY_MARKER, final_summary("a", "o", "h", "r", "t")),
        ];
        let markers: Vec<&str> = prompts.iter().map(|(m, _)| *m).collect();

        for (own, request) in &prompts {
            let text: String = request.messages.iter().map(|m| m.content.as_str()).collect();
            for marker in &markers {
                assert_eq!(text.contains(marker), marker == own, "{own} vs {marker}");
            }
        }
    }

    #[test]
    fn test_rca_prompt_lists_prior_causes() {
        let request = rca_narrative(&ctx(), "f", "d", "t", &["Gi0/1 shut"], false);
        assert!(request.user_text().contains("- Gi0/1 shut"));
        assert!(!request.user_text().contains("repeated one of"));
    }
}
