//! Remediation executor
//!
//! Applies a hypothesis's plan: each device's list runs as one ordered batch,
//! devices run concurrently. Every device's attempt is written to the
//! remediation log as soon as its batch returns, before the loop decides
//! anything else.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;

use netheal_exec::BatchOutcome;

use crate::audit::RemediationLog;
use crate::dispatch::fan_out;
use crate::error::NetHealError;
use crate::services::Services;
use crate::types::{AlarmId, AttemptOutcome, RcaHypothesis, RemediationAttempt};

#[derive(Debug, Clone)]
pub struct RemediationExecutor {
    services: Services,
    log: Arc<RemediationLog>,
}

impl RemediationExecutor {
    pub fn new(services: Services, log: Arc<RemediationLog>) -> Self {
        Self { services, log }
    }

    #[must_use]
    pub fn log(&self) -> &Arc<RemediationLog> {
        &self.log
    }

    /// Apply the plan once
    ///
    /// # Errors
    /// `NetHealError::Checkpoint` if an attempt could not be logged. The other
    /// devices' batches still run to completion first.
    pub async fn apply(
        &self,
        alarm: &AlarmId,
        attempt: u32,
        hypothesis: &RcaHypothesis,
    ) -> Result<IndexMap<String, RemediationAttempt>, NetHealError> {
        tracing::info!(
            alarm = %alarm,
            attempt,
            stage = "remediate",
            devices = hypothesis.plan.steps.len(),
            "applying remediation plan"
        );
        let items: Vec<(String, (String, Vec<String>))> = hypothesis
            .plan
            .steps
            .iter()
            .map(|(device, commands)| (device.clone(), (device.clone(), commands.clone())))
            .collect();

        let services = self.services.clone();
        let log = Arc::clone(&self.log);
        let alarm_id = alarm.clone();
        let hypothesis_id = hypothesis.id;
        let applied = fan_out(items, Some(self.services.fleet_cap), move |(device, commands)| {
            let services = services.clone();
            let log = Arc::clone(&log);
            let alarm = alarm_id.clone();
            async move {
                let outcome = match services.registry.lookup(&device) {
                    Ok(descriptor) => {
                        let descriptor = descriptor.clone();
                        services.executor.run(&descriptor, &commands, services.timeouts).await
                    }
                    Err(e) => BatchOutcome::unreachable(&device, &commands, &e.to_string()),
                };
                let record = attempt_from(hypothesis_id, &alarm, attempt, commands, outcome);
                log.append(record.clone())?;
                Ok::<_, NetHealError>(record)
            }
        })
        .await;

        let mut attempts = IndexMap::new();
        let mut first_error = None;
        for (device, joined) in applied {
            match joined {
                Ok(Ok(record)) => {
                    tracing::info!(device = %device, outcome = ?record.outcome, "remediation batch finished");
                    attempts.insert(device, record);
                }
                Ok(Err(e)) => {
                    tracing::error!(device = %device, error = %e, "remediation attempt not logged");
                    first_error.get_or_insert(e);
                }
                Err(failure) => {
                    // The batch never returned; log what is known so the attempt is not lost
                    let commands = hypothesis.plan.steps.get(&device).cloned().unwrap_or_default();
                    let outcome = BatchOutcome::unreachable(
                        &device,
                        &commands,
                        &format!("remediation task failed: {failure}"),
                    );
                    let record = attempt_from(hypothesis.id, alarm, attempt, commands, outcome);
                    if let Err(e) = self.log.append(record.clone()) {
                        first_error.get_or_insert(e);
                    }
                    attempts.insert(device, record);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(attempts),
        }
    }
}

fn attempt_from(
    hypothesis: ulid::Ulid,
    alarm: &AlarmId,
    attempt: u32,
    commands: Vec<String>,
    outcome: BatchOutcome,
) -> RemediationAttempt {
    RemediationAttempt {
        hypothesis,
        alarm: alarm.clone(),
        attempt,
        outcome: AttemptOutcome::classify(&outcome),
        device: outcome.device,
        commands,
        results: outcome.results,
        connection_error: outcome.connection_error,
        applied_at: Utc::now(),
    }
}

/// Remediation results as one text block
#[must_use]
pub fn render_attempts<'a>(attempts: impl IntoIterator<Item = &'a RemediationAttempt>) -> String {
    let lines: Vec<String> = attempts
        .into_iter()
        .map(|a| {
            let results = a
                .results
                .iter()
                .map(|r| match &r.error {
                    Some(err) => format!("  {} -> error: {err}", r.command),
                    None if r.output.trim().is_empty() => format!("  {} -> ok", r.command),
                    None => format!("  {} -> {}", r.command, r.output.trim()),
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("Attempt {} on {} ({:?}):\n{results}", a.attempt, a.device, a.outcome)
        })
        .collect();
    if lines.is_empty() {
        "none".to_string()
    } else {
        lines.join("\n\n")
    }
}
