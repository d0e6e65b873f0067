//! Oracle backends
//!
//! [`OracleBackend`] is the transport seam: one request in, raw answer text
//! out. [`HttpBackend`] speaks the OpenAI-compatible and Ollama chat APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{OracleConfig, Provider};
use crate::error::OracleError;
use crate::message::{ChatMessage, OracleRequest};

/// Raw transport to a reasoning service
#[async_trait]
pub trait OracleBackend: Send + Sync {
    /// Send one request and return the answer text unmodified
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: AnswerMessage,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: AnswerMessage,
}

#[derive(Deserialize)]
struct AnswerMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP chat backend
pub struct HttpBackend {
    config: OracleConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Build the HTTP client
    ///
    /// # Errors
    /// `OracleError::Config` if the key cannot be resolved or the client cannot be built.
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn url(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        match self.config.provider {
            Provider::OpenAi => format!("{base}/chat/completions"),
            Provider::Ollama => format!("{base}/api/chat"),
        }
    }

    async fn post<B: Serialize + Sync>(&self, body: &B) -> Result<reqwest::Response, OracleError> {
        let mut request = self.client.post(self.url()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::unavailable(format!(
                    "request timed out after {}s",
                    self.config.timeout_secs
                ))
            } else {
                OracleError::unavailable(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(OracleError::unavailable(format!("HTTP {status}: {snippet}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl OracleBackend for HttpBackend {
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let temperature = request.temperature.unwrap_or(self.config.temperature);
        let content = match self.config.provider {
            Provider::OpenAi => {
                let body = OpenAiRequest {
                    model: &self.config.model,
                    messages: &request.messages,
                    temperature,
                    response_format: request.want_structured.then_some(ResponseFormat {
                        kind: "json_object",
                    }),
                };
                let parsed: OpenAiResponse = self
                    .post(&body)
                    .await?
                    .json()
                    .await
                    .map_err(|e| OracleError::unavailable(format!("unreadable response: {e}")))?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
            }
            Provider::Ollama => {
                let body = OllamaRequest {
                    model: &self.config.model,
                    messages: &request.messages,
                    stream: false,
                    options: OllamaOptions { temperature },
                    format: request.want_structured.then_some("json"),
                };
                let parsed: OllamaResponse = self
                    .post(&body)
                    .await?
                    .json()
                    .await
                    .map_err(|e| OracleError::unavailable(format!("unreadable response: {e}")))?;
                parsed.message.content
            }
        };
        Ok(content.unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_body_requests_json_object() {
        let messages = vec![ChatMessage::user("hi")];
        let body = OpenAiRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.1,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["response_format"], json!({"type": "json_object"}));
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_ollama_body_omits_format_for_text() {
        let messages = vec![ChatMessage::user("hi")];
        let body = OllamaRequest {
            model: "llama3.1:8b",
            messages: &messages,
            stream: false,
            options: OllamaOptions { temperature: 0.1 },
            format: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("format").is_none());
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_url_per_provider() {
        let ollama = HttpBackend::new(OracleConfig::default()).unwrap();
        assert_eq!(ollama.url(), "http://localhost:11434/api/chat");

        let openai = HttpBackend::new(
            OracleConfig::default()
                .with_provider(Provider::OpenAi)
                .with_endpoint("https://api.example.com/v1/"),
        )
        .unwrap();
        assert_eq!(openai.url(), "https://api.example.com/v1/chat/completions");
    }
}
