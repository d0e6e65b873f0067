//! Transport seam
//!
//! A [`Connector`] opens a [`Session`] to one device. Executors drive sessions
//! without knowing how bytes reach the device, so tests swap in a scripted
//! connector and production uses [`crate::ssh::OpenSshConnector`].

use std::time::Duration;

use async_trait::async_trait;

use crate::device::DeviceDescriptor;
use crate::error::ExecError;

/// Raw output of one command as the transport saw it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Shell exit status; interactive CLIs have none
    pub exit_status: Option<i32>,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            ..Self::default()
        }
    }
}

/// An open session to one device
#[async_trait]
pub trait Session: Send {
    /// Run one command. A timeout is reported through `ExecOutput::timed_out`
    /// with whatever output arrived; errors mean the session is unusable.
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ExecError>;

    /// Re-read the current privilege level from the device
    async fn is_privileged(&mut self, timeout: Duration) -> Result<bool, ExecError>;

    /// Enter privileged mode
    async fn elevate(&mut self, secret: Option<&str>, timeout: Duration) -> Result<(), ExecError>;

    /// Tear the session down. Must be safe to call after a failure.
    async fn close(&mut self) -> Result<(), ExecError>;
}

/// Opens sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn Session>, ExecError>;
}
