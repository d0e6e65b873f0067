//! Closed-loop orchestrator
//!
//! Drives each alarm through
//! `INTAKE → RECON → HYPOTHESIZE → (AWAITING_CONFIRMATION) → REMEDIATE → VERIFY`
//! and then `RESOLVED`, `ESCALATED` or `RETRY` back into the loop. Every move
//! goes through [`AlarmMachine::advance`], so an illegal transition is an
//! error rather than a silent jump.
//!
//! Alarms run concurrently and independently. Each run ends in a terminal
//! state with a reason; nothing short of a setup failure stops the batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;

use netheal_oracle::OracleError;

use crate::audit::RemediationLog;
use crate::config::NetHealConfig;
use crate::dispatch::fan_out;
use crate::error::NetHealError;
use crate::gate::{AutoConfirm, ConfirmationGate, ConsoleGate};
use crate::intake;
use crate::prompts::AlarmContext;
use crate::rca::{RcaGenerator, RcaHistory, RcaRound};
use crate::recon::Recon;
use crate::remediation::{render_attempts, RemediationExecutor};
use crate::report::{FinalReport, InitialReport, ReportBuilder, ReportFile};
use crate::services::Services;
use crate::state_machine::AlarmMachine;
use crate::telemetry::{NoTelemetry, ProbeTelemetry};
use crate::types::{
    Alarm, AlarmId, AlarmState, AlarmStatus, RcaHypothesis, RcaVerdict, RemediationAttempt,
    VerificationSample,
};
use crate::verify::{TelemetrySource, VerificationCheck};

/// Everything one alarm went through
#[derive(Debug, Clone)]
pub struct AlarmRun {
    pub alarm: Alarm,
    /// Terminal once the run returns
    pub state: AlarmState,
    pub reason: String,
    /// HYPOTHESIZE↔REMEDIATE cycles, failed rounds included
    pub attempts: u32,
    pub rounds: u32,
    pub trail: Vec<AlarmState>,
    pub history: RcaHistory,
    pub remediations: Vec<RemediationAttempt>,
    pub last_sample: Option<VerificationSample>,
}

impl AlarmRun {
    fn new(alarm: Alarm) -> Self {
        Self {
            alarm,
            state: AlarmState::Intake,
            reason: String::new(),
            attempts: 0,
            rounds: 0,
            trail: vec![AlarmState::Intake],
            history: RcaHistory::new(),
            remediations: Vec::new(),
            last_sample: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state == AlarmState::Resolved
    }

    /// Number of plans actually applied
    #[must_use]
    pub fn attempts_applied(&self) -> usize {
        self.remediations
            .iter()
            .map(|a| a.attempt)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Result of one orchestrator run over the whole intake batch
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub runs: Vec<AlarmRun>,
    /// Alarms already resolved at intake
    pub skipped: Vec<AlarmId>,
    pub reports: Vec<FinalReport>,
}

impl RunSummary {
    #[must_use]
    pub fn escalated(&self) -> impl Iterator<Item = &AlarmRun> {
        self.runs.iter().filter(|r| r.state == AlarmState::Escalated)
    }

    /// `0` all resolved or skipped, `2` at least one escalated
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.escalated().next().is_some() {
            2
        } else {
            0
        }
    }
}

/// Terminal transition with its reason
fn finish(
    machine: &mut AlarmMachine,
    run: &mut AlarmRun,
    state: AlarmState,
    reason: impl Into<String>,
) -> Result<(), NetHealError> {
    machine.advance(state)?;
    run.reason = reason.into();
    Ok(())
}

fn log_round_failure(alarm: &AlarmId, round: u32, err: &NetHealError) {
    match err {
        NetHealError::Oracle(OracleError::MalformedResponse { raw, cleaned, reason }) => {
            tracing::warn!(alarm = %alarm, round, %raw, %cleaned, %reason, "malformed oracle answer; round failed");
        }
        other => tracing::warn!(alarm = %alarm, round, error = %other, "hypothesis round failed"),
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    services: Services,
    config: Arc<NetHealConfig>,
    topology: Arc<str>,
    recon: Recon,
    rca: RcaGenerator,
    remediation: RemediationExecutor,
    verifier: Arc<VerificationCheck>,
    reports: ReportBuilder,
    telemetry: Arc<dyn TelemetrySource>,
    gate: Arc<dyn ConfirmationGate>,
}

impl Orchestrator {
    /// Wire the stages over shared services
    ///
    /// Telemetry comes from the configured probes; with human-in-the-loop on
    /// the gate reads the console.
    ///
    /// # Errors
    /// `NetHealError::Checkpoint` if an existing remediation log cannot be read.
    pub fn new(
        services: Services,
        config: NetHealConfig,
        topology: impl Into<Arc<str>>,
    ) -> Result<Self, NetHealError> {
        let log = Arc::new(RemediationLog::open(Arc::clone(&services.checkpoints))?);
        let telemetry: Arc<dyn TelemetrySource> = if config.telemetry.probes.is_empty() {
            Arc::new(NoTelemetry)
        } else {
            Arc::new(ProbeTelemetry::new(services.clone(), config.telemetry.probes.clone()))
        };
        let gate: Arc<dyn ConfirmationGate> = if config.human_in_the_loop {
            Arc::new(ConsoleGate::stdio())
        } else {
            Arc::new(AutoConfirm)
        };
        Ok(Self {
            recon: Recon::new(services.clone()).with_static_path(config.traffic_path.clone()),
            rca: RcaGenerator::new(services.clone()),
            remediation: RemediationExecutor::new(services.clone(), log),
            verifier: Arc::new(VerificationCheck::new(services.oracle.clone())),
            reports: ReportBuilder::new(services.oracle.clone()),
            topology: topology.into(),
            config: Arc::new(config),
            services,
            telemetry,
            gate,
        })
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn remediation_log(&self) -> &Arc<RemediationLog> {
        self.remediation.log()
    }

    #[must_use]
    pub fn verifier(&self) -> &VerificationCheck {
        &self.verifier
    }

    /// Intake, classify, drive every active alarm, write both reports
    ///
    /// # Errors
    /// Setup failures only: unreadable alarm files or unwritable reports.
    pub async fn run(&self) -> Result<RunSummary, NetHealError> {
        let telemetry = self.telemetry.sample().await;
        let combined = intake::collect(
            &self.services.checkpoints,
            Some(&telemetry),
            &self.config.alarm_files,
        )?;
        let alarms = intake::alarms_from(&combined);

        tracing::info!(alarms = alarms.len(), stage = "classify", "Step 2: classifying alarms");
        let classified: Vec<(Alarm, InitialReport)> =
            join_all(alarms.into_iter().map(|a| self.reports.classify(a))).await;
        let initial = ReportFile {
            alarms: classified.iter().map(|(_, r)| r.clone()).collect(),
        };
        let store = &self.services.checkpoints;
        store.write_json(&store.initial_report(), &initial)?;

        let mut skipped = Vec::new();
        let mut active = Vec::new();
        for (alarm, report) in &classified {
            if alarm.status == AlarmStatus::Resolved {
                tracing::info!(alarm = %alarm.id, "already resolved; skipping");
                skipped.push(alarm.id.clone());
            } else {
                active.push((alarm.id.clone(), (alarm.clone(), report.clone())));
            }
        }

        let this = self.clone();
        let finished = fan_out(active.clone(), None, move |(alarm, initial)| {
            let this = this.clone();
            async move {
                let run = this.process(alarm).await;
                let report = this.reports.finalize(&run, &initial).await;
                (run, report)
            }
        })
        .await;

        let mut runs = Vec::new();
        let mut by_id = HashMap::new();
        for ((id, joined), (_, (alarm, initial))) in finished.into_iter().zip(active) {
            let (run, report) = match joined {
                Ok(done) => done,
                Err(failure) => {
                    tracing::error!(alarm = %id, error = %failure, "alarm run failed");
                    let mut run = AlarmRun::new(alarm);
                    run.state = AlarmState::Escalated;
                    run.reason = format!("alarm run failed: {failure}");
                    run.trail.push(AlarmState::Escalated);
                    let mut report = FinalReport::skipped(&initial);
                    report.reason.clone_from(&run.reason);
                    report.final_outcome = format!("Escalated: {}", run.reason);
                    report.base.status = AlarmStatus::Active.as_label().to_string();
                    (run, report)
                }
            };
            by_id.insert(id, report);
            runs.push(run);
        }

        let reports: Vec<FinalReport> = classified
            .iter()
            .map(|(alarm, initial)| {
                by_id
                    .remove(&alarm.id)
                    .unwrap_or_else(|| FinalReport::skipped(initial))
            })
            .collect();
        store.write_json(
            &store.final_report(),
            &ReportFile {
                alarms: reports.clone(),
            },
        )?;
        tracing::info!(
            resolved = runs.iter().filter(|r| r.is_resolved()).count(),
            escalated = runs.iter().filter(|r| !r.is_resolved()).count(),
            skipped = skipped.len(),
            "run complete"
        );
        Ok(RunSummary {
            runs,
            skipped,
            reports,
        })
    }

    /// Drive one alarm to a terminal state
    pub async fn process(&self, alarm: Alarm) -> AlarmRun {
        let mut run = AlarmRun::new(alarm);
        let mut machine = AlarmMachine::new();
        if let Err(e) = self.drive(&mut run, &mut machine).await {
            tracing::error!(alarm = %run.alarm.id, state = %machine.state(), error = %e, "alarm run aborted");
            if machine.advance(AlarmState::Escalated).is_err() {
                // Not every state may escalate directly
                tracing::error!(alarm = %run.alarm.id, "forcing escalation outside the transition table");
            }
            run.reason = e.to_string();
        }
        run.state = if machine.state().is_terminal() {
            machine.state()
        } else {
            AlarmState::Escalated
        };
        run.trail = machine.trail().to_vec();
        if run.trail.last() != Some(&run.state) {
            run.trail.push(run.state);
        }
        tracing::info!(
            alarm = %run.alarm.id,
            state = %run.state,
            attempts = run.attempts,
            reason = %run.reason,
            "alarm closed"
        );
        run
    }

    async fn drive(&self, run: &mut AlarmRun, machine: &mut AlarmMachine) -> Result<(), NetHealError> {
        let id = run.alarm.id.clone();
        let bound = self.config.attempt_bound;

        tracing::info!(alarm = %id, stage = "intake", "Step 3: confirming the alarm is still active");
        let sample = self.sample_and_verify(&run.alarm).await;
        let cleared = sample.cleared;
        run.last_sample = Some(sample);
        if cleared {
            return finish(machine, run, AlarmState::Resolved, "condition cleared before remediation");
        }

        let alarm_text = run.alarm.describe();
        let path = self.recon.resolve_path(&alarm_text, &self.topology).await;
        if path.is_empty() {
            return finish(machine, run, AlarmState::Escalated, "traffic path names no devices");
        }
        let mut ctx = AlarmContext {
            alarm: alarm_text,
            traffic_path: path,
            topology: self.topology.to_string(),
            history: String::new(),
        };

        machine.advance(AlarmState::Recon)?;
        run.rounds = 1;
        let mut recon = self.recon.run(&id, run.rounds, &ctx).await;
        machine.advance(AlarmState::Hypothesize)?;

        loop {
            tracing::info!(alarm = %id, round = run.rounds, attempt = run.attempts, stage = "hypothesize", "Step 4: root cause analysis");
            ctx.history = render_attempts(&run.remediations);
            let telemetry = match &run.last_sample {
                Some(sample) => sample.telemetry.clone(),
                None => self.telemetry.sample().await,
            };
            let generated = self
                .rca
                .generate(RcaRound {
                    alarm: &id,
                    round: run.rounds,
                    ctx: &ctx,
                    recon: &recon,
                    telemetry: &telemetry,
                    history: &run.history,
                })
                .await;
            let generated = generated.and_then(|hypothesis| {
                run.history.record(hypothesis.clone())?;
                Ok(hypothesis)
            });

            match generated {
                Ok(hypothesis) => match hypothesis.verdict {
                    RcaVerdict::ConditionCleared => {
                        return finish(machine, run, AlarmState::Resolved, "condition no longer present");
                    }
                    RcaVerdict::NoRootCause => {
                        let reason = format!("{}: no root cause identified", NetHealError::PlanEmpty);
                        return finish(machine, run, AlarmState::Escalated, reason);
                    }
                    RcaVerdict::Actionable => {
                        if self.config.human_in_the_loop {
                            machine.advance(AlarmState::AwaitingConfirmation)?;
                            if let Err(e) = self.confirm(&id, &hypothesis).await {
                                return finish(machine, run, AlarmState::Escalated, e.to_string());
                            }
                        }
                        machine.advance(AlarmState::Remediate)?;
                        run.attempts += 1;
                        let applied = self.remediation.apply(&id, run.attempts, &hypothesis).await;
                        self.verifier.invalidate(&id);
                        machine.advance(AlarmState::Verify)?;
                        match applied {
                            Ok(attempts) => run.remediations.extend(attempts.into_values()),
                            Err(e) => {
                                let reason = format!("remediation log unavailable: {e}");
                                return finish(machine, run, AlarmState::Escalated, reason);
                            }
                        }

                        tracing::info!(alarm = %id, attempt = run.attempts, stage = "verify", "Step 5: verifying remediation");
                        let sample = self.sample_and_verify(&run.alarm).await;
                        let cleared = sample.cleared;
                        run.last_sample = Some(sample);
                        if cleared {
                            let reason = format!("verified resolved after {} attempt(s)", run.attempts);
                            return finish(machine, run, AlarmState::Resolved, reason);
                        }
                        if run.attempts >= bound {
                            let reason = NetHealError::AttemptLimitReached { attempts: run.attempts };
                            return finish(machine, run, AlarmState::Escalated, reason.to_string());
                        }
                        machine.advance(AlarmState::Retry)?;
                        let delay = self.config.settle_delay();
                        if !delay.is_zero() {
                            tracing::info!(alarm = %id, delay_secs = delay.as_secs(), "waiting for the network to settle");
                            tokio::time::sleep(delay).await;
                        }
                    }
                },
                Err(e) if e.is_retryable() => {
                    log_round_failure(&id, run.rounds, &e);
                    run.attempts += 1;
                    if run.attempts >= bound {
                        let reason = NetHealError::AttemptLimitReached { attempts: run.attempts };
                        return finish(machine, run, AlarmState::Escalated, reason.to_string());
                    }
                    machine.advance(AlarmState::Retry)?;
                }
                Err(e) => return finish(machine, run, AlarmState::Escalated, e.to_string()),
            }

            run.rounds += 1;
            if self.config.refresh_recon_on_retry {
                machine.advance(AlarmState::Recon)?;
                recon = self.recon.run(&id, run.rounds, &ctx).await;
            }
            machine.advance(AlarmState::Hypothesize)?;
        }
    }

    /// Fresh telemetry plus a judgement; an oracle failure reads as not cleared
    async fn sample_and_verify(&self, alarm: &Alarm) -> VerificationSample {
        let telemetry = self.telemetry.sample().await;
        match self.verifier.is_resolved(alarm, telemetry.clone()).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(alarm = %alarm.id, error = %e, "verification unavailable; treating alarm as active");
                VerificationSample {
                    telemetry,
                    cleared: false,
                    rationale: format!("error: {e}"),
                }
            }
        }
    }

    /// Operator reviews the root cause, then approves the plan
    async fn confirm(&self, alarm: &AlarmId, hypothesis: &RcaHypothesis) -> Result<(), NetHealError> {
        self.gate
            .confirm(&format!(
                "Alarm {alarm}: review the root cause analysis (round {}).\n{}",
                hypothesis.round, hypothesis.root_cause
            ))
            .await?;
        let plan = serde_json::to_string_pretty(&hypothesis.plan).unwrap_or_default();
        self.gate
            .confirm(&format!("Alarm {alarm}: apply this remediation plan?\n{plan}"))
            .await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("services", &self.services)
            .field("attempt_bound", &self.config.attempt_bound)
            .field("human_in_the_loop", &self.config.human_in_the_loop)
            .finish_non_exhaustive()
    }
}
