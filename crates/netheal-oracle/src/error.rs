//! Error types for the oracle client

/// Oracle failure kinds visible to callers
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    /// Transport failure, provider error, or empty answer that survived the retry
    #[error("oracle unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        /// Calls made before giving up
        attempts: u32,
        /// Last failure seen
        reason: String,
    },

    /// Structured answer that could not be parsed even after repair
    #[error("malformed oracle response: {reason}")]
    MalformedResponse {
        /// Text exactly as returned
        raw: String,
        /// Extracted and repaired text that was fed to the parser
        cleaned: String,
        /// Parser diagnostic
        reason: String,
    },

    /// Client could not be built from its configuration
    #[error("oracle configuration error: {0}")]
    Config(String),
}

impl OracleError {
    /// Single transport failure
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            attempts: 1,
            reason: reason.into(),
        }
    }

    /// Worth one more call
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Structured extraction failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ParseError {
    pub raw: String,
    pub cleaned: String,
    pub reason: String,
}

impl From<ParseError> for OracleError {
    fn from(err: ParseError) -> Self {
        Self::MalformedResponse {
            raw: err.raw,
            cleaned: err.cleaned,
            reason: err.reason,
        }
    }
}
