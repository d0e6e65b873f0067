//! Oracle connection settings

use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// Chat API flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// `POST {endpoint}/chat/completions`
    #[serde(alias = "openai-compatible")]
    OpenAi,
    /// `POST {endpoint}/api/chat`
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: Provider,
    pub endpoint: String,
    pub model: String,
    /// Inline key; prefer `api_key_env`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the key
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            api_key_env: None,
            temperature: 0.1,
            timeout_secs: 120,
        }
    }
}

impl OracleConfig {
    #[inline]
    #[must_use]
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Inline key, else the named environment variable
    ///
    /// # Errors
    /// `OracleError::Config` when `api_key_env` names an unset variable.
    pub fn resolve_api_key(&self) -> Result<Option<String>, OracleError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| OracleError::Config(format!("environment variable {var} is not set"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_local_ollama() {
        let config = OracleConfig::default();
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.timeout_secs, 120);
        assert!(config.resolve_api_key().unwrap().is_none());
    }

    #[test]
    fn test_missing_key_variable_is_config_error() {
        let config = OracleConfig {
            api_key_env: Some("NETHEAL_TEST_KEY_THAT_IS_NOT_SET".into()),
            ..OracleConfig::default()
        };
        assert!(matches!(
            config.resolve_api_key(),
            Err(OracleError::Config(_))
        ));
    }

    #[test]
    fn test_inline_key_wins() {
        let config = OracleConfig {
            api_key: Some("k".into()),
            api_key_env: Some("IGNORED".into()),
            ..OracleConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap().as_deref(), Some("k"));
    }
}
