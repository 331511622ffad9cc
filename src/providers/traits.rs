//! Provider trait and wire-neutral message types.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::sessions::Turn;

/// A message in the request sent to a completion provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }
    }
}

/// One item produced by a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFragment {
    /// Non-empty incremental text.
    Text(String),
    /// The stream broke after it had started. Always the last item.
    Error(String),
}

/// Lazy sequence of fragments. Dropping it aborts the underlying request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = StreamFragment> + Send>>;

/// Failures talking to a completion provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} API key not set. Set AI_MODEL_KEY or api_key in config.toml.")]
    MissingApiKey { provider: String },

    #[error("{provider} API error ({status}): {body}")]
    Open {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} stream failed: {message}")]
    Stream { provider: String, message: String },

    #[error("No response from {provider}")]
    EmptyResponse { provider: String },

    #[error("{provider} timed out {stage}")]
    Timeout {
        provider: String,
        stage: &'static str,
    },
}

/// An LLM chat-completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Canonical provider name, used in logs and errors.
    fn name(&self) -> &str;

    /// Single-shot completion over the full message list.
    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String, ProviderError>;

    /// Open a streaming completion.
    ///
    /// Errors that prevent the stream from starting are returned here, before
    /// any fragment exists. Failures after that arrive as a final
    /// [`StreamFragment::Error`].
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<FragmentStream, ProviderError>;
}
