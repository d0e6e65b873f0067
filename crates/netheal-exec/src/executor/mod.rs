//! Command executors
//!
//! One executor per device kind, all behind [`CommandExecutor`]:
//! - [`ShellExecutor`] for Linux hosts: exit status and stderr per command
//! - [`PrivilegedExecutor`] for network CLIs: privileged mode is re-checked
//!   before every command and paging is disabled once per session
//! - [`FleetExecutor`] dispatches on [`DeviceKind`]
//!
//! Every executor shares the same batch contract:
//! - one result per submitted command, in order
//! - `sleep N` never reaches the transport; it succeeds unless it outlasts
//!   the per-command timeout, which cuts it short as a timed-out result
//! - a connection failure fails the rest of the batch without raising
//! - the device lease is held for the whole batch and the session is closed
//!   on every exit path

mod privileged;
mod shell;

pub use privileged::PrivilegedExecutor;
pub use shell::ShellExecutor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::Instrument;

use crate::device::{DeviceDescriptor, DeviceKind};
use crate::error::{ConnectionFailure, ExecError};
use crate::lease::DeviceLeases;
use crate::result::{parse_sleep, BatchOutcome, CommandResult, ExecTimeouts};
use crate::session::{Connector, ExecOutput, Session};
use crate::session_log::{SessionLog, SessionRecord};

/// Slack on top of the per-command timeout before the transport is declared hung
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);

/// Runs a batch of commands on one device
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Never fails: every problem is folded into the returned results
    async fn run(
        &self,
        device: &DeviceDescriptor,
        commands: &[String],
        timeouts: ExecTimeouts,
    ) -> BatchOutcome;
}

/// Kind-specific session setup
#[async_trait]
pub(crate) trait Preflight: Send + Sync {
    /// Once, right after connecting
    async fn on_open(
        &self,
        session: &mut dyn Session,
        device: &DeviceDescriptor,
        timeouts: ExecTimeouts,
    ) -> Result<(), ExecError>;

    /// Before every non-sleep command
    async fn before_command(
        &self,
        session: &mut dyn Session,
        device: &DeviceDescriptor,
        timeouts: ExecTimeouts,
    ) -> Result<(), ExecError>;
}

/// Shared batch driver
#[derive(Clone)]
pub(crate) struct BatchRunner {
    connector: Arc<dyn Connector>,
    leases: Arc<DeviceLeases>,
    session_log: Option<Arc<SessionLog>>,
}

impl BatchRunner {
    pub(crate) fn new(connector: Arc<dyn Connector>, leases: Arc<DeviceLeases>) -> Self {
        Self {
            connector,
            leases,
            session_log: None,
        }
    }

    pub(crate) fn set_session_log(&mut self, log: Arc<SessionLog>) {
        self.session_log = Some(log);
    }

    pub(crate) async fn drive(
        &self,
        device: &DeviceDescriptor,
        commands: &[String],
        timeouts: ExecTimeouts,
        preflight: &dyn Preflight,
    ) -> BatchOutcome {
        let span = tracing::info_span!(
            "batch",
            device = %device.name,
            kind = %device.kind,
            commands = commands.len()
        );
        let outcome = async {
            let _lease = self.leases.acquire(&device.name).await;
            self.drive_leased(device, commands, timeouts, preflight).await
        }
        .instrument(span)
        .await;

        if let Some(log) = &self.session_log {
            let record = SessionRecord::from_outcome(device.kind, &outcome);
            if let Err(e) = log.append(&record).await {
                tracing::warn!(device = %device.name, error = %e, "session log append failed");
            }
        }
        outcome
    }

    async fn drive_leased(
        &self,
        device: &DeviceDescriptor,
        commands: &[String],
        timeouts: ExecTimeouts,
        preflight: &dyn Preflight,
    ) -> BatchOutcome {
        let mut results = Vec::with_capacity(commands.len());
        let mut session: Option<Box<dyn Session>> = None;
        let mut failure: Option<String> = None;

        for command in commands {
            if let Some(delay) = parse_sleep(command) {
                if delay > timeouts.per_command {
                    tracing::warn!(?delay, limit = ?timeouts.per_command, "sleep exceeds command timeout");
                    tokio::time::sleep(timeouts.per_command).await;
                    results.push(CommandResult::timed_out(command.clone(), ""));
                } else {
                    tracing::debug!(?delay, "sleep handled locally");
                    tokio::time::sleep(delay).await;
                    results.push(CommandResult::slept(command.clone()));
                }
                continue;
            }

            if session.is_none() {
                match self.open(device, timeouts, preflight).await {
                    Ok(opened) => session = Some(opened),
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }
            let Some(active) = session.as_mut() else {
                break;
            };

            match run_one(active.as_mut(), device, command, timeouts, preflight).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if let Some(message) = &failure {
            tracing::warn!(error = %message, remaining = commands.len() - results.len(), "batch short-circuited");
            let error = format!("connection error: {message}");
            for command in &commands[results.len()..] {
                results.push(CommandResult::failed(command.clone(), error.clone()));
            }
        }

        if let Some(mut active) = session {
            if let Err(e) = active.close().await {
                tracing::debug!(error = %e, "session close failed");
            }
        }

        BatchOutcome {
            device: device.name.clone(),
            results,
            connection_error: failure,
        }
    }

    async fn open(
        &self,
        device: &DeviceDescriptor,
        timeouts: ExecTimeouts,
        preflight: &dyn Preflight,
    ) -> Result<Box<dyn Session>, ExecError> {
        let connect = self.connector.connect(device, timeouts.connect);
        let mut session = match tokio::time::timeout(timeouts.connect, connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExecError::connection(
                    &device.name,
                    ConnectionFailure::Unreachable,
                    format!("connect timed out after {}s", timeouts.connect.as_secs()),
                ))
            }
        };
        tracing::debug!("session open");

        if let Err(e) = preflight.on_open(session.as_mut(), device, timeouts).await {
            if let Err(close_err) = session.close().await {
                tracing::debug!(error = %close_err, "session close failed");
            }
            return Err(e);
        }
        Ok(session)
    }
}

async fn run_one(
    session: &mut dyn Session,
    device: &DeviceDescriptor,
    command: &str,
    timeouts: ExecTimeouts,
    preflight: &dyn Preflight,
) -> Result<CommandResult, ExecError> {
    preflight.before_command(session, device, timeouts).await?;

    let guard = timeouts.per_command + TRANSPORT_GRACE;
    match tokio::time::timeout(guard, session.exec(command, timeouts.per_command)).await {
        Ok(output) => Ok(into_result(command, output?)),
        Err(_) => Err(ExecError::connection(
            &device.name,
            ConnectionFailure::Protocol,
            "transport stopped responding",
        )),
    }
}

/// Fold transport output into a result
///
/// Stderr becomes the error only when the command failed; a successful
/// command's stderr is kept with its output.
fn into_result(command: &str, output: ExecOutput) -> CommandResult {
    if output.timed_out {
        return CommandResult::timed_out(command, output.stdout);
    }
    let stderr = output.stderr.trim();
    let failed_status = output.exit_status.is_some_and(|code| code != 0);
    let error = match (failed_status, stderr.is_empty(), output.exit_status) {
        (true, false, _) => Some(stderr.to_string()),
        (true, true, Some(code)) => Some(format!("exit status {code}")),
        (false, false, None) => Some(stderr.to_string()),
        _ => None,
    };
    let text = if error.is_none() && !stderr.is_empty() {
        format!("{}\n{stderr}", output.stdout.trim_end())
    } else {
        output.stdout
    };
    CommandResult::completed(command, text, error, output.exit_status)
}

/// Dispatches each device to the executor for its kind
#[derive(Clone)]
pub struct FleetExecutor {
    shell: ShellExecutor,
    privileged: PrivilegedExecutor,
}

impl FleetExecutor {
    pub fn new(connector: Arc<dyn Connector>, leases: Arc<DeviceLeases>) -> Self {
        Self {
            shell: ShellExecutor::new(Arc::clone(&connector), Arc::clone(&leases)),
            privileged: PrivilegedExecutor::new(connector, leases),
        }
    }

    /// Record every batch to `log`
    #[must_use]
    pub fn with_session_log(mut self, log: Arc<SessionLog>) -> Self {
        self.shell = self.shell.with_session_log(Arc::clone(&log));
        self.privileged = self.privileged.with_session_log(log);
        self
    }

    #[must_use]
    pub fn for_kind(&self, kind: DeviceKind) -> &dyn CommandExecutor {
        if kind.requires_privilege() {
            &self.privileged
        } else {
            &self.shell
        }
    }
}

#[async_trait]
impl CommandExecutor for FleetExecutor {
    async fn run(
        &self,
        device: &DeviceDescriptor,
        commands: &[String],
        timeouts: ExecTimeouts,
    ) -> BatchOutcome {
        self.for_kind(device.kind).run(device, commands, timeouts).await
    }
}
