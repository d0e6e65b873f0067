//! Human confirmation gate
//!
//! A deliberate blocking wait: the operator must type `confirm`. Anything
//! else is rejected and re-prompted; there is no timeout and no alternate
//! answer. Closing the input is the only way out without confirming.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::error::NetHealError;

pub const CONFIRM_TOKEN: &str = "confirm";

#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Returns once the operator confirms
    ///
    /// # Errors
    /// `NetHealError::Gate` if the operator can no longer answer.
    async fn confirm(&self, prompt: &str) -> Result<(), NetHealError>;
}

/// Gate used when human-in-the-loop is off
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationGate for AutoConfirm {
    async fn confirm(&self, prompt: &str) -> Result<(), NetHealError> {
        tracing::debug!(prompt, "auto-confirmed");
        Ok(())
    }
}

/// Line-oriented gate over any reader/writer pair
///
/// Concurrent alarms queue on the lock, so one prompt is answered at a time.
pub struct ConsoleGate<R, W> {
    io: Mutex<(R, W)>,
}

impl ConsoleGate<BufReader<Stdin>, Stdout> {
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> ConsoleGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    /// The wrapped reader and writer
    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner()
    }
}

fn gate_io(e: &std::io::Error) -> NetHealError {
    NetHealError::Gate(format!("console i/o failed: {e}"))
}

#[async_trait]
impl<R, W> ConfirmationGate for ConsoleGate<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, prompt: &str) -> Result<(), NetHealError> {
        let mut guard = self.io.lock().await;
        let (reader, writer) = &mut *guard;
        writer
            .write_all(format!("{prompt}\nType '{CONFIRM_TOKEN}' to continue: ").as_bytes())
            .await
            .map_err(|e| gate_io(&e))?;
        writer.flush().await.map_err(|e| gate_io(&e))?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).await.map_err(|e| gate_io(&e))?;
            if read == 0 {
                return Err(NetHealError::Gate("input closed before confirmation".into()));
            }
            if line.trim().eq_ignore_ascii_case(CONFIRM_TOKEN) {
                tracing::info!("operator confirmed");
                return Ok(());
            }
            writer
                .write_all(
                    format!("Invalid input. Please type '{CONFIRM_TOKEN}' to continue: ").as_bytes(),
                )
                .await
                .map_err(|e| gate_io(&e))?;
            writer.flush().await.map_err(|e| gate_io(&e))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_other_input_is_reprompted() {
        let input: &[u8] = b"yes\n  CONFIRM \n";
        let gate = ConsoleGate::new(input, Vec::new());

        gate.confirm("Apply plan to router?").await.unwrap();

        let (_, written) = gate.into_inner();
        let written = String::from_utf8(written).unwrap();
        assert!(written.starts_with("Apply plan to router?\n"));
        assert_eq!(written.matches("Invalid input").count(), 1);
    }

    #[tokio::test]
    async fn test_closed_input_is_gate_error() {
        let input: &[u8] = b"no\n";
        let gate = ConsoleGate::new(input, Vec::new());

        let err = gate.confirm("Apply?").await.unwrap_err();
        assert!(matches!(err, NetHealError::Gate(_)));
    }

    #[tokio::test]
    async fn test_auto_confirm() {
        assert!(AutoConfirm.confirm("anything").await.is_ok());
    }
}
