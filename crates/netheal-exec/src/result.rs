//! Per-command results and batch outcomes

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Outcome of one command on one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandResult {
    /// Completed command
    pub fn completed(
        command: impl Into<String>,
        output: impl Into<String>,
        error: Option<String>,
        exit_status: Option<i32>,
    ) -> Self {
        Self {
            command: command.into(),
            output: output.into(),
            error,
            exit_status,
            timed_out: false,
        }
    }

    /// Command that hit its deadline; `partial` is whatever arrived before it
    pub fn timed_out(command: impl Into<String>, partial: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: partial.into(),
            error: Some("command timed out".to_string()),
            exit_status: None,
            timed_out: true,
        }
    }

    /// Command that could not run
    pub fn failed(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: String::new(),
            error: Some(error.into()),
            exit_status: None,
            timed_out: false,
        }
    }

    /// Locally handled `sleep` pseudo-command
    pub fn slept(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: String::new(),
            error: None,
            exit_status: Some(0),
            timed_out: false,
        }
    }

    /// No error, no timeout, and a zero (or absent) exit status
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && !self.timed_out && self.exit_status.map_or(true, |code| code == 0)
    }

    /// Carries device output worth feeding to the oracle
    #[must_use]
    pub fn is_substantive(&self) -> bool {
        !self.timed_out
            && self.error.is_none()
            && !self.output.trim().is_empty()
            && parse_sleep(&self.command).is_none()
    }
}

/// All results from one batch on one device
///
/// `results` has exactly one entry per submitted command, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub device: String,
    pub results: Vec<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

impl BatchOutcome {
    /// Every command gets the same failure; used when no session could be opened
    pub fn unreachable(device: impl Into<String>, commands: &[String], error: &str) -> Self {
        Self {
            device: device.into(),
            results: commands
                .iter()
                .map(|c| CommandResult::failed(c.clone(), error))
                .collect(),
            connection_error: Some(error.to_string()),
        }
    }

    /// Command text to result; a repeated command keeps its last result
    #[must_use]
    pub fn by_command(&self) -> IndexMap<&str, &CommandResult> {
        self.results
            .iter()
            .map(|r| (r.command.as_str(), r))
            .collect()
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.connection_error.is_none() && self.results.iter().all(CommandResult::succeeded)
    }

    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        self.connection_error.is_some()
    }
}

/// Connect and per-command deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecTimeouts {
    pub connect: Duration,
    pub per_command: Duration,
}

impl Default for ExecTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            per_command: Duration::from_secs(60),
        }
    }
}

impl ExecTimeouts {
    #[inline]
    #[must_use]
    pub fn with_connect(mut self, connect: Duration) -> Self {
        self.connect = connect;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_per_command(mut self, per_command: Duration) -> Self {
        self.per_command = per_command;
        self
    }
}

/// Recognize the `sleep <seconds>` pseudo-command
///
/// Only a bare non-negative number that fits a [`Duration`] is accepted;
/// anything else is an ordinary command and goes to the device.
#[must_use]
pub fn parse_sleep(command: &str) -> Option<Duration> {
    let mut parts = command.split_whitespace();
    if parts.next()? != "sleep" {
        return None;
    }
    let secs: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sleep() {
        assert_eq!(parse_sleep("sleep 5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_sleep("  sleep   0.5 "), Some(Duration::from_millis(500)));
        assert_eq!(parse_sleep("sleep"), None);
        assert_eq!(parse_sleep("sleep -1"), None);
        assert_eq!(parse_sleep("sleep 5 && reboot"), None);
        assert_eq!(parse_sleep("sleepy 5"), None);
        assert_eq!(parse_sleep("sleep 1e20"), None);
        assert_eq!(parse_sleep("sleep inf"), None);
        assert_eq!(parse_sleep("sleep NaN"), None);
        assert_eq!(parse_sleep("show ip route"), None);
    }

    #[test]
    fn test_success_classification() {
        assert!(CommandResult::completed("ls", "a", None, Some(0)).succeeded());
        assert!(CommandResult::completed("show run", "x", None, None).succeeded());
        assert!(!CommandResult::completed("false", "", None, Some(1)).succeeded());
        assert!(!CommandResult::timed_out("ping", "partial").succeeded());
        assert!(CommandResult::slept("sleep 1").succeeded());
    }

    #[test]
    fn test_substantive_excludes_sleep_and_empty() {
        assert!(!CommandResult::slept("sleep 1").is_substantive());
        assert!(!CommandResult::completed("x", "   ", None, Some(0)).is_substantive());
        assert!(!CommandResult::failed("x", "boom").is_substantive());
        assert!(CommandResult::completed("x", "data", None, Some(0)).is_substantive());
    }

    #[test]
    fn test_unreachable_batch_covers_every_command() {
        let commands = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let outcome = BatchOutcome::unreachable("R1", &commands, "refused");
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.is_connection_failure());
        assert_eq!(outcome.by_command().len(), 2);
        assert!(!outcome.all_succeeded());
    }
}
