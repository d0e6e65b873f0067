//! OpenSSH transport
//!
//! Drives the system `ssh` binary through `tokio::process`:
//! - Linux hosts get a multiplexed master connection (`-M -S <socket>`); each
//!   command is a separate client over that socket, which gives a real exit
//!   status and separate stderr while keeping one connection per batch.
//! - Network CLIs get an interactive `-tt` session; output is read until the
//!   device prompt comes back. A command that times out is interrupted and
//!   the session is resynchronized on an echoed marker comment before the
//!   next command, so late output never lands in another command's result.
//!
//! Password logins go through `sshpass -e`, with the password passed in the
//! environment rather than on the command line.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::device::{DeviceDescriptor, DeviceKind};
use crate::error::{ConnectionFailure, ExecError};
use crate::session::{Connector, ExecOutput, Session};

static CLI_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.\-/()@:]+[>#]\s*$").expect("prompt pattern"));

static PASSWORD_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)password:\s*$").expect("password pattern"));

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

static SYNC_SEQ: AtomicU64 = AtomicU64::new(0);

/// Ctrl-Shift-6: the IOS escape for ping, traceroute and other long runners
const BREAK_SEQUENCE: &[u8] = b"\x1e";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ssh exits with 255 when the failure is its own rather than the remote command's
const SSH_FAILURE_STATUS: i32 = 255;

/// Opens sessions with the local OpenSSH client
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    ssh_program: PathBuf,
    sshpass_program: PathBuf,
    control_dir: PathBuf,
    host_key_policy: String,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self {
            ssh_program: PathBuf::from("ssh"),
            sshpass_program: PathBuf::from("sshpass"),
            control_dir: std::env::temp_dir().join("netheal-ssh"),
            host_key_policy: "accept-new".to_string(),
        }
    }
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_ssh_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ssh_program = program.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    /// `StrictHostKeyChecking` value, `accept-new` by default
    #[inline]
    #[must_use]
    pub fn with_host_key_policy(mut self, policy: impl Into<String>) -> Self {
        self.host_key_policy = policy.into();
        self
    }

    /// Authenticated ssh invocation for `device`; `extra` goes before the host
    fn login_command(
        &self,
        device: &DeviceDescriptor,
        timeout: Duration,
        extra: &[OsString],
    ) -> Command {
        let creds = &device.credentials;
        let mut cmd = match &creds.password {
            Some(password) => {
                let mut cmd = Command::new(&self.sshpass_program);
                cmd.arg("-e").arg(&self.ssh_program).env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.ssh_program);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        cmd.arg("-p")
            .arg(device.port.to_string())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={}", self.host_key_policy))
            .args(["-o", "ServerAliveInterval=15"]);
        if let Some(key) = &creds.key_file {
            cmd.arg("-i").arg(key);
        }
        cmd.args(extra).arg(target(device));
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(
        &self,
        device: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn Session>, ExecError> {
        match device.kind {
            DeviceKind::LinuxHost => {
                let session = MultiplexedShell::open(self, device, timeout).await?;
                Ok(Box::new(session))
            }
            DeviceKind::NetworkIos | DeviceKind::NetworkAsa | DeviceKind::NetworkSwitch => {
                let session = InteractiveCli::open(self, device, timeout).await?;
                Ok(Box::new(session))
            }
        }
    }
}

fn target(device: &DeviceDescriptor) -> String {
    if device.credentials.username.is_empty() {
        device.address.clone()
    } else {
        format!("{}@{}", device.credentials.username, device.address)
    }
}

/// Map ssh's own diagnostics onto a failure class
fn classify(stderr: &str) -> ConnectionFailure {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("too many authentication failures")
    {
        ConnectionFailure::Auth
    } else if lower.contains("could not resolve")
        || lower.contains("no route to host")
        || lower.contains("connection refused")
        || lower.contains("timed out")
        || lower.contains("network is unreachable")
    {
        ConnectionFailure::Unreachable
    } else {
        ConnectionFailure::Protocol
    }
}

fn spawn_failure(device: &DeviceDescriptor, err: &std::io::Error) -> ExecError {
    ExecError::connection(
        &device.name,
        ConnectionFailure::Protocol,
        format!("cannot start ssh: {err}"),
    )
}

/// Copy a pipe into a shared buffer until EOF
async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, sink: Arc<Mutex<Vec<u8>>>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
        }
    }
}

fn drain(buf: &Mutex<Vec<u8>>) -> String {
    String::from_utf8_lossy(&std::mem::take(&mut *buf.lock())).into_owned()
}

/// Linux shell over an ssh control master
struct MultiplexedShell {
    device: String,
    target: String,
    port: u16,
    ssh_program: PathBuf,
    socket: PathBuf,
    master: Child,
}

impl MultiplexedShell {
    async fn open(
        connector: &OpenSshConnector,
        device: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<Self, ExecError> {
        tokio::fs::create_dir_all(&connector.control_dir).await?;
        let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
        let socket = connector
            .control_dir
            .join(format!("{}-{seq}.sock", std::process::id()));

        let extra: Vec<OsString> = vec![
            "-M".into(),
            "-N".into(),
            "-S".into(),
            socket.clone().into_os_string(),
            "-o".into(),
            "ControlPersist=no".into(),
        ];
        let mut master = connector
            .login_command(device, timeout, &extra)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure(device, &e))?;

        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_task = tokio::spawn(pump(master.stderr.take(), Arc::clone(&stderr_buf)));

        let mut shell = Self {
            device: device.name.clone(),
            target: target(device),
            port: device.port,
            ssh_program: connector.ssh_program.clone(),
            socket,
            master,
        };

        let deadline = Instant::now() + timeout;
        loop {
            if shell.socket.exists() && shell.control("check").await {
                stderr_task.abort();
                return Ok(shell);
            }
            if shell.master.try_wait()?.is_some() {
                let _ = stderr_task.await;
                let message = drain(&stderr_buf);
                return Err(ExecError::connection(
                    &device.name,
                    classify(&message),
                    message.trim().to_string(),
                ));
            }
            if Instant::now() >= deadline {
                stderr_task.abort();
                let _ = shell.master.kill().await;
                return Err(ExecError::connection(
                    &device.name,
                    ConnectionFailure::Unreachable,
                    "master connection not ready before timeout",
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn client(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-S")
            .arg(&self.socket)
            .args(["-o", "BatchMode=yes", "-p"])
            .arg(self.port.to_string());
        cmd.kill_on_drop(true);
        cmd
    }

    /// `ssh -O <op>` against the master; true on success
    async fn control(&self, op: &str) -> bool {
        self.client()
            .arg("-O")
            .arg(op)
            .arg(&self.target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }
}

#[async_trait]
impl Session for MultiplexedShell {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ExecError> {
        let mut child = self
            .client()
            .arg(&self.target)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let out_buf = Arc::new(Mutex::new(Vec::new()));
        let err_buf = Arc::new(Mutex::new(Vec::new()));
        let out_task = tokio::spawn(pump(child.stdout.take(), Arc::clone(&out_buf)));
        let err_task = tokio::spawn(pump(child.stderr.take(), Arc::clone(&err_buf)));

        if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
            let status = status?;
            let _ = out_task.await;
            let _ = err_task.await;
            let stderr = drain(&err_buf);
            if status.code() == Some(SSH_FAILURE_STATUS) && !self.control("check").await {
                return Err(ExecError::connection(
                    &self.device,
                    classify(&stderr),
                    format!("connection lost: {}", stderr.trim()),
                ));
            }
            Ok(ExecOutput {
                stdout: drain(&out_buf),
                stderr,
                exit_status: status.code(),
                timed_out: false,
            })
        } else {
            let _ = child.kill().await;
            out_task.abort();
            err_task.abort();
            tracing::debug!(device = %self.device, command, "command timed out");
            Ok(ExecOutput {
                stdout: drain(&out_buf),
                stderr: drain(&err_buf),
                exit_status: None,
                timed_out: true,
            })
        }
    }

    async fn is_privileged(&mut self, _timeout: Duration) -> Result<bool, ExecError> {
        Ok(true)
    }

    async fn elevate(&mut self, _secret: Option<&str>, _timeout: Duration) -> Result<(), ExecError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.control("exit").await;
        let _ = self.master.kill().await;
        remove_socket(&self.socket).await;
        Ok(())
    }
}

async fn remove_socket(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "control socket cleanup failed");
        }
    }
}

/// Interactive network CLI over `ssh -tt`
struct InteractiveCli {
    device: String,
    child: Child,
    stdin: ChildStdin,
    chunks: mpsc::Receiver<String>,
    buffer: String,
}

/// What a read stopped on
struct Screen {
    text: String,
    timed_out: bool,
}

impl Screen {
    fn last_line(&self) -> &str {
        self.text.rsplit('\n').next().unwrap_or("").trim_end()
    }
}

fn is_prompt(line: &str) -> bool {
    CLI_PROMPT.is_match(line.trim_end())
}

fn is_password_prompt(line: &str) -> bool {
    PASSWORD_PROMPT.is_match(line.trim_end())
}

impl InteractiveCli {
    async fn open(
        connector: &OpenSshConnector,
        device: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<Self, ExecError> {
        let mut child = connector
            .login_command(device, timeout, &["-tt".into()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure(device, &e))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ExecError::connection(&device.name, ConnectionFailure::Protocol, "no stdin pipe")
        })?;
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(pump(child.stderr.take(), Arc::clone(&stderr_buf)));

        let (tx, chunks) = mpsc::channel(64);
        if let Some(mut stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let text = String::from_utf8_lossy(&chunk[..n]).replace('\r', "");
                            if tx.send(text).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let mut cli = Self {
            device: device.name.clone(),
            child,
            stdin,
            chunks,
            buffer: String::new(),
        };
        match cli.read_until(is_prompt, timeout).await {
            Ok(screen) if !screen.timed_out => Ok(cli),
            Ok(_) => {
                let _ = cli.child.kill().await;
                Err(ExecError::connection(
                    &device.name,
                    ConnectionFailure::Protocol,
                    "no CLI prompt before timeout",
                ))
            }
            Err(_) => {
                let _ = cli.child.wait().await;
                let message = drain(&stderr_buf);
                Err(ExecError::connection(
                    &device.name,
                    classify(&message),
                    message.trim().to_string(),
                ))
            }
        }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ExecError> {
        let write = async {
            self.stdin.write_all(bytes).await?;
            self.stdin.flush().await
        };
        write.await.map_err(|e| {
            ExecError::connection(&self.device, ConnectionFailure::Protocol, e.to_string())
        })
    }

    async fn send(&mut self, line: &str) -> Result<(), ExecError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_raw(&bytes).await
    }

    /// Interrupt a timed-out command and discard everything up to a fresh prompt
    ///
    /// A marker comment is sent after the break; its echo can only arrive after
    /// the hung command's remaining output, so the prompt that follows it is
    /// the first one that belongs to the next command.
    async fn resync(&mut self, timeout: Duration) -> Result<(), ExecError> {
        self.write_raw(BREAK_SEQUENCE).await?;
        let marker = format!("! netheal-sync-{}", SYNC_SEQ.fetch_add(1, Ordering::Relaxed));
        self.send(&marker).await?;

        let deadline = Instant::now() + timeout;
        loop {
            if synced(&self.buffer, &marker) {
                tracing::debug!(device = %self.device, discarded = self.buffer.len(), "CLI resynchronized");
                self.buffer.clear();
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, self.chunks.recv()).await {
                Ok(Some(chunk)) => self.buffer.push_str(&chunk),
                Ok(None) => {
                    return Err(ExecError::connection(
                        &self.device,
                        ConnectionFailure::Protocol,
                        "session closed by device",
                    ))
                }
                Err(_) => {
                    return Err(ExecError::connection(
                        &self.device,
                        ConnectionFailure::Protocol,
                        "CLI did not return to a prompt after a timed-out command",
                    ))
                }
            }
        }
    }

    /// Accumulate output until the last line satisfies `done` or time runs out
    async fn read_until(
        &mut self,
        done: fn(&str) -> bool,
        timeout: Duration,
    ) -> Result<Screen, ExecError> {
        let deadline = Instant::now() + timeout;
        loop {
            let last = self.buffer.rsplit('\n').next().unwrap_or("");
            if done(last) {
                return Ok(Screen {
                    text: std::mem::take(&mut self.buffer),
                    timed_out: false,
                });
            }
            match tokio::time::timeout_at(deadline, self.chunks.recv()).await {
                Ok(Some(chunk)) => self.buffer.push_str(&chunk),
                Ok(None) => {
                    return Err(ExecError::connection(
                        &self.device,
                        ConnectionFailure::Protocol,
                        "session closed by device",
                    ))
                }
                Err(_) => {
                    return Ok(Screen {
                        text: std::mem::take(&mut self.buffer),
                        timed_out: true,
                    })
                }
            }
        }
    }
}

/// The marker's echo has been seen and a prompt follows it
fn synced(buffer: &str, marker: &str) -> bool {
    let Some(at) = buffer.rfind(marker) else {
        return false;
    };
    let after = &buffer[at + marker.len()..];
    after.contains('\n') && after.rsplit('\n').next().is_some_and(is_prompt)
}

/// Split a CLI screen into output and error lines, dropping the echo and prompt
fn parse_screen(command: &str, screen: &Screen) -> ExecOutput {
    let mut lines: Vec<&str> = screen.text.lines().collect();
    if lines
        .first()
        .is_some_and(|first| first.trim_end().ends_with(command.trim()))
    {
        lines.remove(0);
    }
    if !screen.timed_out && lines.last().is_some_and(|last| is_prompt(last)) {
        lines.pop();
    }

    let (errors, output): (Vec<&str>, Vec<&str>) = lines.into_iter().partition(|line| {
        let t = line.trim_start();
        t.starts_with("% ") || t.starts_with("ERROR:")
    });
    ExecOutput {
        stdout: output.join("\n"),
        stderr: errors.join("\n"),
        exit_status: None,
        timed_out: screen.timed_out,
    }
}

#[async_trait]
impl Session for InteractiveCli {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ExecError> {
        self.send(command).await?;
        let screen = self.read_until(is_prompt, timeout).await?;
        if screen.timed_out {
            tracing::warn!(device = %self.device, command, "command timed out; interrupting");
            self.resync(timeout).await?;
        }
        Ok(parse_screen(command, &screen))
    }

    async fn is_privileged(&mut self, timeout: Duration) -> Result<bool, ExecError> {
        self.send("").await?;
        let screen = self.read_until(is_prompt, timeout).await?;
        Ok(!screen.timed_out && screen.last_line().ends_with('#'))
    }

    async fn elevate(&mut self, secret: Option<&str>, timeout: Duration) -> Result<(), ExecError> {
        self.send("enable").await?;
        let screen = self
            .read_until(|l| is_prompt(l) || is_password_prompt(l), timeout)
            .await?;
        if screen.timed_out {
            return Err(ExecError::connection(
                &self.device,
                ConnectionFailure::Protocol,
                "no response to enable",
            ));
        }
        if is_password_prompt(screen.last_line()) {
            self.send(secret.unwrap_or("")).await?;
            let after = self
                .read_until(|l| is_prompt(l) || is_password_prompt(l), timeout)
                .await?;
            if after.timed_out || is_password_prompt(after.last_line()) {
                return Err(ExecError::connection(
                    &self.device,
                    ConnectionFailure::Auth,
                    "enable secret rejected",
                ));
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        let _ = self.send("exit").await;
        let _ = self.child.kill().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(text: &str) -> Screen {
        Screen {
            text: text.to_string(),
            timed_out: false,
        }
    }

    #[test]
    fn test_prompt_detection() {
        assert!(is_prompt("R1#"));
        assert!(is_prompt("R1>"));
        assert!(is_prompt("ciscoasa(config)# "));
        assert!(is_prompt("SW1(config-if)#"));
        assert!(!is_prompt("Building configuration..."));
        assert!(!is_prompt("interface GigabitEthernet0/1 # comment here"));
        assert!(is_password_prompt("Password: "));
        assert!(!is_password_prompt("R1#"));
    }

    #[test]
    fn test_parse_screen_strips_echo_and_prompt() {
        let out = parse_screen(
            "show ip int brief",
            &screen("R1#show ip int brief\nGi0/0 10.0.0.1 up up\nGi0/1 unassigned down down\nR1#"),
        );
        assert_eq!(out.stdout, "Gi0/0 10.0.0.1 up up\nGi0/1 unassigned down down");
        assert!(out.stderr.is_empty());
        assert!(!out.timed_out);
    }

    #[test]
    fn test_parse_screen_collects_cli_errors() {
        let out = parse_screen(
            "show bogus",
            &screen("R1#show bogus\n% Invalid input detected at '^' marker.\nR1#"),
        );
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr, "% Invalid input detected at '^' marker.");
    }

    #[test]
    fn test_late_prompts_do_not_count_as_resynchronized() {
        let marker = "! netheal-sync-7";
        // tail of a timed-out ping, then its own prompt, before the marker echo
        assert!(!synced("!!!!!\nSuccess rate is 100 percent\nR1#", marker));
        assert!(!synced("...\nR1#! netheal-sync-7", marker));
        assert!(synced("...\nR1#\nR1#! netheal-sync-7\nR1#", marker));
        assert!(synced("R1#! netheal-sync-7\n\nR1#", marker));
        assert!(!synced("R1#! netheal-sync-7\nTranslating...", marker));
    }

    #[test]
    fn test_classify_ssh_diagnostics() {
        assert_eq!(
            classify("admin@10.0.0.1: Permission denied (password)."),
            ConnectionFailure::Auth
        );
        assert_eq!(
            classify("ssh: connect to host 10.0.0.9 port 22: Connection refused"),
            ConnectionFailure::Unreachable
        );
        assert_eq!(
            classify("kex_exchange_identification: read: Connection reset by peer"),
            ConnectionFailure::Protocol
        );
    }

    #[test]
    fn test_target_includes_user() {
        let device = DeviceDescriptor::new("srv", DeviceKind::LinuxHost, "10.0.0.4");
        assert_eq!(target(&device), "10.0.0.4");
    }
}
