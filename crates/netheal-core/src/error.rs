//! Error types for the orchestrator
//!
//! Wraps device and oracle failures and adds the loop's own kinds:
//! - empty or duplicate hypotheses
//! - the attempt bound
//! - gate and checkpoint failures
//! - setup problems that stop a run before any alarm is processed

use std::path::PathBuf;

use netheal_exec::ExecError;
use netheal_oracle::OracleError;

use crate::types::AlarmState;

#[derive(Debug, thiserror::Error)]
pub enum NetHealError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// No actionable remediation could be derived
    #[error("no actionable remediation plan")]
    PlanEmpty,

    #[error("attempt limit reached after {attempts} attempt(s)")]
    AttemptLimitReached { attempts: u32 },

    /// The oracle repeated an earlier root cause after being told not to
    #[error("hypothesis repeats an earlier root cause")]
    DuplicateHypothesis,

    #[error("confirmation gate failed: {0}")]
    Gate(String),

    #[error("checkpoint write to {path} failed: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("setup failure: {0}")]
    Setup(String),

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: AlarmState, to: AlarmState },

    #[error("configuration error: {0}")]
    Config(String),
}

impl NetHealError {
    pub fn checkpoint(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Checkpoint {
            path: path.into(),
            source,
        }
    }

    /// Counts as a failed round rather than ending the alarm run
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Oracle(_) | Self::PlanEmpty | Self::DuplicateHypothesis
        )
    }

    /// Stops the whole run before (or instead of) processing alarms
    #[inline]
    #[must_use]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Setup(_)
                | Self::Config(_)
                | Self::Exec(ExecError::Registry(_) | ExecError::UnknownDeviceKind(_))
        )
    }
}
