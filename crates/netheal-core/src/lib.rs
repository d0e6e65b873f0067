//! netheal-core - the closed-loop fault triage orchestrator
//!
//! Provides:
//! - The alarm data model and the per-alarm state machine
//! - A bounded parallel dispatcher used by every fan-out
//! - Reconnaissance, insight synthesis and two-step RCA over the oracle
//! - Remediation under a confirmation gate with a hash-chained attempt log
//! - Memoized verification against fresh probe telemetry
//! - Intake, initial/final reports and file checkpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use netheal_core::prelude::*;
//!
//! let config = NetHealConfig::load("netheal.toml".as_ref())?;
//! let services = Services::new(registry, executor, oracle, checkpoints);
//! let orchestrator = Orchestrator::new(services, config, topology)?;
//! let summary = orchestrator.run().await?;
//! std::process::exit(summary.exit_code());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod audit;
pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod insight;
pub mod intake;
pub mod orchestrator;
pub mod prompts;
pub mod rca;
pub mod recon;
pub mod remediation;
pub mod report;
pub mod services;
pub mod state_machine;
pub mod telemetry;
pub mod types;
pub mod verify;

pub use audit::{verify_chain, IntegrityViolation, LogEntry, RemediationLog};
pub use checkpoint::CheckpointStore;
pub use config::{NetHealConfig, ProbeConfig, TelemetryConfig, TimeoutConfig};
pub use dispatch::{fan_out, TaskFailure};
pub use error::NetHealError;
pub use gate::{AutoConfirm, ConfirmationGate, ConsoleGate, CONFIRM_TOKEN};
pub use insight::InsightSynthesizer;
pub use orchestrator::{AlarmRun, Orchestrator, RunSummary};
pub use rca::{RcaGenerator, RcaHistory};
pub use recon::{Recon, ReconReport};
pub use remediation::RemediationExecutor;
pub use report::{FinalReport, InitialReport, ReportBuilder};
pub use services::Services;
pub use state_machine::{allowed_transitions, validate_transition, AlarmMachine};
pub use telemetry::{NoTelemetry, ProbeTelemetry};
pub use types::{
    Alarm, AlarmClass, AlarmId, AlarmState, AlarmStatus, AttemptOutcome, Insight, RcaHypothesis,
    RcaVerdict, RemediationAttempt, RemediationPlan, Telemetry, VerificationSample,
};
pub use verify::{TelemetrySource, VerificationCheck};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the loop
    pub use crate::{
        Alarm, AlarmState, AutoConfirm, CheckpointStore, ConfirmationGate, NetHealConfig,
        NetHealError, Orchestrator, RunSummary, Services, TelemetrySource,
    };
}
