//! Insight synthesis
//!
//! Raw command output becomes one finding per device, then one finding for
//! the fleet. The oracle does the reading; this module decides what it gets
//! to read:
//! - substantive results get one oracle insight each, concurrently
//! - empty, timed-out, failed and `sleep` results are reported verbatim
//! - a failed oracle call degrades to an `error:` finding, never to a gap

use std::sync::Arc;

use netheal_exec::{parse_sleep, CommandResult, DeviceDescriptor};

use crate::dispatch::fan_out;
use crate::prompts::{self, AlarmContext};
use crate::services::Services;
use crate::types::Insight;

/// Finding for one device plus the per-command lines it was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInsight {
    pub insight: Insight,
    /// One line per command, in command order
    pub detailed: Vec<String>,
}

/// Verbatim line for a result the oracle never sees
#[must_use]
pub fn describe_non_substantive(device: &str, result: &CommandResult) -> Option<String> {
    if result.is_substantive() {
        return None;
    }
    let command = &result.command;
    let line = if parse_sleep(command).is_some() {
        format!("Device '{device}', Command '{command}' resulted in: local pause, no device output")
    } else if result.timed_out {
        format!("Device '{device}', Command '{command}' resulted in: timed out")
    } else if let Some(err) = &result.error {
        format!("Device '{device}', Command '{command}' resulted in: {err}")
    } else {
        format!("Device '{device}', Command '{command}' returned no result.")
    };
    Some(line)
}

/// Insights rendered as one text block, one section per device
#[must_use]
pub fn render_insights(insights: &[Insight]) -> String {
    insights
        .iter()
        .map(|i| {
            let kind = i.kind.map_or("unknown", |k| k.as_str());
            format!("Device: {} ({kind})\n{}", i.device, i.finding.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone)]
pub struct InsightSynthesizer {
    services: Services,
}

impl InsightSynthesizer {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn summarize_device(
        &self,
        device: &DeviceDescriptor,
        results: &[CommandResult],
        ctx: &AlarmContext,
    ) -> DeviceInsight {
        let mut lines: Vec<Option<String>> = vec![None; results.len()];
        let mut skipped = Vec::new();
        let mut substantive = Vec::new();
        for (index, result) in results.iter().enumerate() {
            match describe_non_substantive(&device.name, result) {
                Some(line) => {
                    lines[index] = Some(line.clone());
                    skipped.push(line);
                }
                None => substantive.push((index, result.clone())),
            }
        }

        let oracle = self.services.oracle.clone();
        let descriptor = Arc::new(device.clone());
        let alarm: Arc<str> = Arc::from(ctx.alarm.as_str());
        let answers = fan_out(substantive, Some(self.services.fleet_cap), move |result| {
            let oracle = oracle.clone();
            let device = Arc::clone(&descriptor);
            let alarm = Arc::clone(&alarm);
            async move {
                let request = prompts::command_insight(&device, &result.command, &result.output, &alarm);
                match oracle.ask(&request).await {
                    Ok(text) => text.trim().to_string(),
                    Err(e) => format!(
                        "Device '{}', Command '{}': insight unavailable ({e})",
                        device.name, result.command
                    ),
                }
            }
        })
        .await;

        let mut findings = Vec::new();
        for (index, answer) in answers {
            let text = answer.unwrap_or_else(|e| format!("error: {e}"));
            lines[index] = Some(text.clone());
            findings.push(text);
        }
        let detailed: Vec<String> = lines.into_iter().flatten().collect();

        let finding = if findings.is_empty() {
            skipped.join("\n")
        } else {
            let merged = match self
                .services
                .oracle
                .ask(&prompts::device_summary(&device.name, &findings))
                .await
            {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    tracing::warn!(device = %device.name, error = %e, "device summary unavailable");
                    format!("error: summary unavailable ({e})\n{}", findings.join("\n"))
                }
            };
            if skipped.is_empty() {
                merged
            } else {
                format!("{merged}\n\nNo usable output:\n{}", skipped.join("\n"))
            }
        };

        DeviceInsight {
            insight: Insight::new(&device.name, Some(device.kind), finding),
            detailed,
        }
    }

    pub async fn summarize_fleet(&self, insights: &[Insight], ctx: &AlarmContext) -> Insight {
        if insights.is_empty() {
            return Insight::fleet("no device insights collected");
        }
        let per_device = render_insights(insights);
        match self
            .services
            .oracle
            .ask(&prompts::fleet_summary(&per_device, ctx))
            .await
        {
            Ok(text) => Insight::fleet(text.trim()),
            Err(e) => {
                tracing::warn!(error = %e, "fleet synthesis unavailable");
                Insight::fleet(format!("error: fleet synthesis unavailable ({e})\n\n{per_device}"))
            }
        }
    }
}
