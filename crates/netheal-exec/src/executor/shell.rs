//! Linux host executor

use std::sync::Arc;

use async_trait::async_trait;

use super::{BatchRunner, CommandExecutor, Preflight};
use crate::device::DeviceDescriptor;
use crate::error::ExecError;
use crate::lease::DeviceLeases;
use crate::result::{BatchOutcome, ExecTimeouts};
use crate::session::{Connector, Session};
use crate::session_log::SessionLog;

/// Plain shell session; no privilege negotiation
#[derive(Clone)]
pub struct ShellExecutor {
    runner: BatchRunner,
}

impl ShellExecutor {
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

struct NoPreflight;

#[async_trait]
impl Preflight for NoPreflight {
    async fn on_open(
        &self,
        _session: &mut dyn Session,
        _device: &DeviceDescriptor,
        _timeouts: ExecTimeouts,
    ) -> Result<(), ExecError> {
        Ok(())
    }

    async fn before_command(
        &self,
        _session: &mut dyn Session,
        _device: &DeviceDescriptor,
        _timeouts: ExecTimeouts,
    ) -> Result<(), ExecError> {
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(
        &self,
        device: &DeviceDescriptor,
        commands: &[String],
        timeouts: ExecTimeouts,
    ) -> BatchOutcome {
        self.runner
            .drive(device, commands, timeouts, &NoPreflight)
            .await
    }
}
