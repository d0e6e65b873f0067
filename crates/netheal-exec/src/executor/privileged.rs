//! Network CLI executor (routers, firewalls, switches)

use std::sync::Arc;

use async_trait::async_trait;

use super::{BatchRunner, CommandExecutor, Preflight};
use crate::device::DeviceDescriptor;
use crate::error::{ConnectionFailure, ExecError};
use crate::lease::DeviceLeases;
use crate::result::{BatchOutcome, ExecTimeouts};
use crate::session::{Connector, Session};
use crate::session_log::SessionLog;

/// Runs every command from privileged mode
///
/// Configuration commands can drop the session out of privileged mode, so
/// the level is read back from the device before each command instead of
/// being remembered.
#[derive(Clone)]
pub struct PrivilegedExecutor {
    runner: BatchRunner,
}

impl PrivilegedExecutor {
    pub fn new(connector: Arc<dyn Connector>, leases: Arc<DeviceLeases>) -> Self {
        Self {
            runner: BatchRunner::new(connector, leases),
        }
    }

    #[must_use]
    pub fn with_session_log(mut self, log: Arc<SessionLog>) -> Self {
        self.runner.set_session_log(log);
        self
    }
}

struct EnableMode;

impl EnableMode {
    async fn ensure(
        session: &mut dyn Session,
        device: &DeviceDescriptor,
        timeouts: ExecTimeouts,
    ) -> Result<(), ExecError> {
        if session.is_privileged(timeouts.per_command).await? {
            return Ok(());
        }
        tracing::debug!(device = %device.name, "entering privileged mode");
        session
            .elevate(
                device.credentials.enable_secret.as_deref(),
                timeouts.per_command,
            )
            .await?;
        if session.is_privileged(timeouts.per_command).await? {
            Ok(())
        } else {
            Err(ExecError::connection(
                &device.name,
                ConnectionFailure::Auth,
                "privileged mode refused",
            ))
        }
    }
}

#[async_trait]
impl Preflight for EnableMode {
    async fn on_open(
        &self,
        session: &mut dyn Session,
        device: &DeviceDescriptor,
        timeouts: ExecTimeouts,
    ) -> Result<(), ExecError> {
        Self::ensure(session, device, timeouts).await?;
        if let Some(paging) = device.kind.paging_command() {
            let output = session.exec(paging, timeouts.per_command).await?;
            if output.timed_out {
                tracing::warn!(device = %device.name, "paging disable timed out");
            }
        }
        Ok(())
    }

    async fn before_command(
        &self,
        session: &mut dyn Session,
        device: &DeviceDescriptor,
        timeouts: ExecTimeouts,
    ) -> Result<(), ExecError> {
        Self::ensure(session, device, timeouts).await
    }
}

#[async_trait]
impl CommandExecutor for PrivilegedExecutor {
    async fn run(
        &self,
        device: &DeviceDescriptor,
        commands: &[String],
        timeouts: ExecTimeouts,
    ) -> BatchOutcome {
        self.runner.drive(device, commands, timeouts, &EnableMode).await
    }
}
