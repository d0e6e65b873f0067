//! Oracle client: retry-once policy and structured answers
//!
//! Stateless between calls. No caching, no conversation memory; callers
//! pass the full message list every time.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::backend::{HttpBackend, OracleBackend};
use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::extract::parse_structured;
use crate::message::OracleRequest;

/// One call plus one retry
const MAX_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct OracleClient {
    backend: Arc<dyn OracleBackend>,
    retry_delay: Duration,
}

impl OracleClient {
    pub fn new(backend: Arc<dyn OracleBackend>) -> Self {
        Self {
            backend,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// HTTP-backed client
    ///
    /// # Errors
    /// `OracleError::Config` if the backend cannot be built.
    pub fn from_config(config: OracleConfig) -> Result<Self, OracleError> {
        Ok(Self::new(Arc::new(HttpBackend::new(config)?)))
    }

    #[inline]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Free-text answer
    ///
    /// # Errors
    /// `OracleError::Unavailable` when both attempts fail or come back empty.
    pub async fn ask(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let mut reason = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.backend.complete(request).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => reason = "empty response".to_string(),
                Err(OracleError::Unavailable { reason: r, .. }) => reason = r,
                Err(other) => return Err(other),
            }
            tracing::warn!(
                attempt,
                model = self.backend.model_name(),
                reason = %reason,
                "oracle call failed"
            );
            if attempt < MAX_ATTEMPTS && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(OracleError::Unavailable {
            attempts: MAX_ATTEMPTS,
            reason,
        })
    }

    /// Shorthand for a single user prompt
    ///
    /// # Errors
    /// See [`OracleClient::ask`].
    pub async fn ask_text(&self, prompt: impl Into<String>) -> Result<String, OracleError> {
        self.ask(&OracleRequest::prompt(prompt)).await
    }

    /// Structured answer parsed into `T`
    ///
    /// A malformed answer is not retried.
    ///
    /// # Errors
    /// `Unavailable` as for [`OracleClient::ask`]; `MalformedResponse` when
    /// the answer cannot be parsed even after repair.
    pub async fn ask_structured<T: DeserializeOwned>(
        &self,
        request: OracleRequest,
    ) -> Result<T, OracleError> {
        let request = request.structured();
        let raw = self.ask(&request).await?;
        parse_structured(&raw).map_err(|e| {
            tracing::warn!(reason = %e.reason, "structured answer did not parse");
            OracleError::from(e)
        })
    }

    /// Structured answer as untyped JSON
    ///
    /// # Errors
    /// See [`OracleClient::ask_structured`].
    pub async fn ask_json(&self, request: OracleRequest) -> Result<serde_json::Value, OracleError> {
        self.ask_structured(request).await
    }
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("model", &self.backend.model_name())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
