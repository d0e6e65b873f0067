//! Chat message model and the oracle request shape

use serde::{Deserialize, Serialize};

/// Speaker of one chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One oracle call
#[derive(Debug, Clone, PartialEq)]
pub struct OracleRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the client default when set
    pub temperature: Option<f32>,
    /// Ask the provider for a JSON object and parse the answer
    pub want_structured: bool,
}

impl OracleRequest {
    /// Single user prompt
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::from_messages(vec![ChatMessage::user(text)])
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            want_structured: false,
        }
    }

    /// Prepend a system prompt
    #[must_use]
    pub fn with_system(mut self, text: impl Into<String>) -> Self {
        self.messages.insert(0, ChatMessage::system(text));
        self
    }

    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[inline]
    #[must_use]
    pub fn structured(mut self) -> Self {
        self.want_structured = true;
        self
    }

    /// Text of the last user message, for routing and logging
    #[must_use]
    pub fn user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str())
    }
}
