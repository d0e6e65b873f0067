//! In-memory device transport
//!
//! `FakeConnector` stands in for SSH. Devices are scripted with canned
//! replies and failure modes; every command that reaches the transport is
//! recorded so tests can assert on what was (and was not) sent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use netheal_exec::{
    ConnectionFailure, Connector, DeviceDescriptor, ExecError, ExecOutput, Session,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeReply {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
}

impl FakeReply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: Some(0),
        }
    }

    pub fn error(stderr: impl Into<String>, exit_status: Option<i32>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status,
        }
    }
}

/// Behaviour of one scripted device
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    replies: HashMap<String, FakeReply>,
    default_output: Option<String>,
    refuse: Option<ConnectionFailure>,
    unprivileged: bool,
    enable_secret: Option<String>,
    drops_privilege_on: HashSet<String>,
    hangs_on: HashSet<String>,
    panics_on: HashSet<String>,
    lose_after: Option<usize>,
    latency: Duration,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reply(mut self, command: &str, stdout: &str) -> Self {
        self.replies.insert(command.to_string(), FakeReply::ok(stdout));
        self
    }

    #[must_use]
    pub fn reply_with(mut self, command: &str, reply: FakeReply) -> Self {
        self.replies.insert(command.to_string(), reply);
        self
    }

    /// Output for commands without a scripted reply; `"<command>: ok"` otherwise
    #[must_use]
    pub fn default_output(mut self, stdout: &str) -> Self {
        self.default_output = Some(stdout.to_string());
        self
    }

    /// Every connect attempt fails
    #[must_use]
    pub fn refuse(mut self, failure: ConnectionFailure) -> Self {
        self.refuse = Some(failure);
        self
    }

    /// Session starts outside privileged mode; `secret` unlocks it (`None` accepts anything)
    #[must_use]
    pub fn unprivileged(mut self, secret: Option<&str>) -> Self {
        self.unprivileged = true;
        self.enable_secret = secret.map(str::to_string);
        self
    }

    /// Running `command` leaves privileged mode
    #[must_use]
    pub fn drops_privilege_on(mut self, command: &str) -> Self {
        self.drops_privilege_on.insert(command.to_string());
        self
    }

    /// `command` never finishes before its timeout
    #[must_use]
    pub fn hang_on(mut self, command: &str) -> Self {
        self.hangs_on.insert(command.to_string());
        self
    }

    #[must_use]
    pub fn panic_on(mut self, command: &str) -> Self {
        self.panics_on.insert(command.to_string());
        self
    }

    /// Connection drops after `n` executed commands
    #[must_use]
    pub fn lose_connection_after(mut self, n: usize) -> Self {
        self.lose_after = Some(n);
        self
    }

    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Clone)]
struct Fix {
    trigger_device: String,
    trigger_command: String,
    target_device: String,
    target_command: String,
    healed: FakeReply,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: HashMap<String, FakeDevice>,
    overrides: HashMap<(String, String), FakeReply>,
    fixes: Vec<Fix>,
    executed: Vec<(String, String)>,
    connects: HashMap<String, usize>,
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
    closed: usize,
    elevations: usize,
}

/// Scripted connector shared between a test and the code under test
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_device(self, name: &str, device: FakeDevice) -> Self {
        self.state.lock().devices.insert(name.to_string(), device);
        self
    }

    /// Once `trigger_command` runs on `trigger_device`, `target_command` on
    /// `target_device` answers `healed` instead of its scripted reply
    #[must_use]
    pub fn heal_when(
        self,
        trigger_device: &str,
        trigger_command: &str,
        target_device: &str,
        target_command: &str,
        healed: &str,
    ) -> Self {
        self.state.lock().fixes.push(Fix {
            trigger_device: trigger_device.to_string(),
            trigger_command: trigger_command.to_string(),
            target_device: target_device.to_string(),
            target_command: target_command.to_string(),
            healed: FakeReply::ok(healed),
        });
        self
    }

    /// Commands that reached `device`, in order
    #[must_use]
    pub fn executed(&self, device: &str) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Every (device, command) pair that reached the transport
    #[must_use]
    pub fn all_executed(&self) -> Vec<(String, String)> {
        self.state.lock().executed.clone()
    }

    #[must_use]
    pub fn connect_count(&self, device: &str) -> usize {
        self.state.lock().connects.get(device).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously open sessions seen on `device`
    #[must_use]
    pub fn max_concurrent(&self, device: &str) -> usize {
        self.state.lock().max_active.get(device).copied().unwrap_or(0)
    }

    /// Sessions currently open across all devices
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state.lock().active.values().sum()
    }

    #[must_use]
    pub fn closed_sessions(&self) -> usize {
        self.state.lock().closed
    }

    #[must_use]
    pub fn elevations(&self) -> usize {
        self.state.lock().elevations
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
        _timeout: Duration,
    ) -> Result<Box<dyn Session>, ExecError> {
        let mut state = self.state.lock();
        *state.connects.entry(device.name.clone()).or_default() += 1;
        let Some(script) = state.devices.get(&device.name).cloned() else {
            return Err(ExecError::connection(
                &device.name,
                ConnectionFailure::Unreachable,
                "no route to host",
            ));
        };
        if let Some(failure) = script.refuse {
            return Err(ExecError::connection(&device.name, failure, "scripted refusal"));
        }
        let active = {
            let slot = state.active.entry(device.name.clone()).or_default();
            *slot += 1;
            *slot
        };
        let peak = state.max_active.entry(device.name.clone()).or_default();
        *peak = (*peak).max(active);

        Ok(Box::new(FakeSession {
            device: device.name.clone(),
            privileged: !script.unprivileged,
            script,
            state: Arc::clone(&self.state),
            executed: 0,
            open: true,
        }))
    }
}

struct FakeSession {
    device: String,
    script: FakeDevice,
    state: Arc<Mutex<FakeState>>,
    privileged: bool,
    executed: usize,
    open: bool,
}

impl FakeSession {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.state.lock();
            if let Some(slot) = state.active.get_mut(&self.device) {
                *slot = slot.saturating_sub(1);
            }
            state.closed += 1;
        }
    }

    /// Record the command, apply heals it triggers, and look up its reply
    fn respond(&self, command: &str) -> FakeReply {
        let mut state = self.state.lock();
        state
            .executed
            .push((self.device.clone(), command.to_string()));

        let healed: Vec<Fix> = state
            .fixes
            .iter()
            .filter(|f| f.trigger_device == self.device && f.trigger_command == command)
            .cloned()
            .collect();
        for fix in healed {
            state
                .overrides
                .insert((fix.target_device, fix.target_command), fix.healed);
        }

        if let Some(reply) = state
            .overrides
            .get(&(self.device.clone(), command.to_string()))
        {
            return reply.clone();
        }
        self.script.replies.get(command).cloned().unwrap_or_else(|| {
            FakeReply::ok(
                self.script
                    .default_output
                    .clone()
                    .unwrap_or_else(|| format!("{command}: ok")),
            )
        })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ExecError> {
        if self.script.lose_after.is_some_and(|n| self.executed >= n) {
            return Err(ExecError::connection(
                &self.device,
                ConnectionFailure::Protocol,
                "connection reset by peer",
            ));
        }
        self.executed += 1;
        let reply = self.respond(command);

        if self.script.panics_on.contains(command) {
            panic!("scripted panic on {command}");
        }
        if self.script.hangs_on.contains(command) || self.script.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(ExecOutput {
                stdout: "partial".to_string(),
                stderr: String::new(),
                exit_status: None,
                timed_out: true,
            });
        }
        if !self.script.latency.is_zero() {
            tokio::time::sleep(self.script.latency).await;
        }
        if self.script.drops_privilege_on.contains(command) {
            self.privileged = false;
        }
        Ok(ExecOutput {
            stdout: reply.stdout,
            stderr: reply.stderr,
            exit_status: reply.exit_status,
            timed_out: false,
        })
    }

    async fn is_privileged(&mut self, _timeout: Duration) -> Result<bool, ExecError> {
        Ok(self.privileged)
    }

    async fn elevate(&mut self, secret: Option<&str>, _timeout: Duration) -> Result<(), ExecError> {
        self.state.lock().elevations += 1;
        let accepted = match &self.script.enable_secret {
            Some(expected) => secret == Some(expected.as_str()),
            None => true,
        };
        if accepted {
            self.privileged = true;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.release();
        Ok(())
    }
}
