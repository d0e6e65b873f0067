//! Verification check
//!
//! Asks the oracle whether the alarm condition persists given the freshest
//! telemetry. Judgements are memoized per `(alarm, telemetry digest)` so
//! checking twice without an intervening remediation gives the same answer;
//! the orchestrator invalidates an alarm's entries after every remediation.

use async_trait::async_trait;
use dashmap::DashMap;

use netheal_oracle::OracleClient;

use crate::error::NetHealError;
use crate::prompts;
use crate::types::{Alarm, AlarmId, Telemetry, VerificationSample};

/// Produces fresh telemetry on demand
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(&self) -> Telemetry;
}

/// `Resolved` / `not-Resolved` answer; anything else is read as not resolved
#[must_use]
pub fn parse_verdict(answer: &str) -> bool {
    let word: String = answer
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_ascii_lowercase();
    word == "resolved"
}

#[derive(Debug)]
pub struct VerificationCheck {
    oracle: OracleClient,
    memo: DashMap<(AlarmId, String), (bool, String)>,
}

impl VerificationCheck {
    pub fn new(oracle: OracleClient) -> Self {
        Self {
            oracle,
            memo: DashMap::new(),
        }
    }

    /// # Errors
    /// `NetHealError::Oracle` if the oracle cannot answer; nothing is memoized.
    pub async fn is_resolved(
        &self,
        alarm: &Alarm,
        telemetry: Telemetry,
    ) -> Result<VerificationSample, NetHealError> {
        let key = (alarm.id.clone(), telemetry.digest());
        if let Some(entry) = self.memo.get(&key) {
            let (cleared, rationale) = entry.value().clone();
            tracing::debug!(alarm = %alarm.id, cleared, "verification memo hit");
            return Ok(VerificationSample {
                telemetry,
                cleared,
                rationale,
            });
        }

        let answer = self
            .oracle
            .ask(&prompts::verify(&alarm.describe(), &telemetry.render()))
            .await?;
        let cleared = parse_verdict(&answer);
        tracing::info!(alarm = %alarm.id, cleared, stage = "verify", "verification judged");
        self.memo.insert(key, (cleared, answer.clone()));
        Ok(VerificationSample {
            telemetry,
            cleared,
            rationale: answer,
        })
    }

    /// Forget judgements for `alarm`
    pub fn invalidate(&self, alarm: &AlarmId) {
        self.memo.retain(|(id, _), _| id != alarm);
    }

    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict("Resolved"));
        assert!(parse_verdict("  'resolved'.\n"));
        assert!(!parse_verdict("not-Resolved"));
        assert!(!parse_verdict("Not Resolved"));
        assert!(!parse_verdict("The alarm is resolved, probably"));
        assert!(!parse_verdict(""));
    }
}
