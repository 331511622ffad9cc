//! Generic OpenAI-compatible provider.
//! Most LLM APIs (OpenAI, DeepSeek, and most self-hosted gateways) follow the
//! same `/v1/chat/completions` format, streaming included.

use crate::providers::traits::{ChatMessage, FragmentStream, Provider, ProviderError, StreamFragment};
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

/// A provider that speaks the OpenAI-compatible chat completions API.
pub struct OpenAiCompatibleProvider {
    pub(crate) name: String,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            // No overall request timeout: streams are bounded by the orchestrator.
            client: Client::builder()
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build the full URL for chat completions, detecting if base_url already includes the path.
    fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.base_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| {
                self.base_url
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            });

        if has_full_endpoint {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn require_api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey {
                provider: self.name.clone(),
            })
    }

    fn transport_error(&self, err: &reqwest::Error) -> ProviderError {
        ProviderError::Transport {
            provider: self.name.clone(),
            message: super::sanitize_api_error(&err.to_string()),
        }
    }

    /// Send a chat request and fail on anything but a 2xx status.
    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.require_api_key()?;
        let url = self.chat_completions_url();

        tracing::debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream.unwrap_or(false),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.name, response).await);
        }

        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

impl ChatRequest {
    fn new(messages: &[ChatMessage], model: &str, temperature: f64, stream: bool) -> Self {
        Self {
            model: model.to_string(),
            messages: messages
                .iter()
                .map(|m| Message {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature,
            stream: Some(stream),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ══════════════════════════════════════════════════════════
// SSE streaming types for OpenAI-compatible chat completions
// ══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct StreamChatResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Some gateways report failures inside the event stream instead of the status line.
/// `error` is either an object with a `message` or a bare string.
#[derive(Debug, Deserialize)]
struct StreamErrorEnvelope {
    error: serde_json::Value,
}

impl StreamErrorEnvelope {
    fn message(&self) -> Option<String> {
        match &self.error {
            serde_json::Value::Null => None,
            serde_json::Value::String(message) if !message.trim().is_empty() => {
                Some(message.clone())
            }
            serde_json::Value::Object(body) => Some(
                body.get("message")
                    .and_then(serde_json::Value::as_str)
                    .filter(|message| !message.trim().is_empty())
                    .map_or_else(|| GENERIC_STREAM_ERROR.to_string(), ToString::to_string),
            ),
            _ => Some(GENERIC_STREAM_ERROR.to_string()),
        }
    }
}

const GENERIC_STREAM_ERROR: &str = "provider reported an error";

/// A single `data:` payload from an SSE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsePayload {
    Data(String),
    Done,
}

/// Remove every complete line from `buffer` and return the `data:` payloads
/// found in them. A trailing partial line stays in the buffer.
///
/// Works on bytes so that a multi-byte character split across network chunks
/// is only decoded once its line is complete.
pub fn drain_sse_payloads(buffer: &mut Vec<u8>) -> Vec<SsePayload> {
    let Some(last_newline) = buffer.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };

    let complete: Vec<u8> = buffer.drain(..=last_newline).collect();
    let mut payloads = Vec::new();

    for raw_line in complete.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(raw_line);
        let line = line.trim_end_matches('\r');
        // Lines that don't start with "data:" are ignored (comments, event names, etc.)
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            payloads.push(SsePayload::Done);
        } else {
            payloads.push(SsePayload::Data(data.to_string()));
        }
    }

    payloads
}

/// Turn one JSON chunk into zero or more fragments. Unparseable chunks are skipped.
fn fragments_from_payload(payload: &str) -> Vec<StreamFragment> {
    if let Ok(chunk) = serde_json::from_str::<StreamChatResponse>(payload) {
        if !chunk.choices.is_empty() {
            return chunk
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(StreamFragment::Text)
                .collect();
        }
    }

    if let Ok(envelope) = serde_json::from_str::<StreamErrorEnvelope>(payload) {
        if let Some(message) = envelope.message() {
            return vec![StreamFragment::Error(super::sanitize_api_error(&message))];
        }
    }

    tracing::trace!(payload, "Skipping unrecognized stream chunk");
    Vec::new()
}

struct SseState<S> {
    provider: String,
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<StreamFragment>,
    finished: bool,
}

impl<S> SseState<S> {
    fn drain(&mut self) {
        for payload in drain_sse_payloads(&mut self.buffer) {
            match payload {
                SsePayload::Done => {
                    self.finished = true;
                    self.buffer.clear();
                    return;
                }
                SsePayload::Data(data) => {
                    for fragment in fragments_from_payload(&data) {
                        let terminal = matches!(fragment, StreamFragment::Error(_));
                        self.pending.push_back(fragment);
                        if terminal {
                            self.finished = true;
                            self.buffer.clear();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Adapt a raw SSE byte stream into a lazy [`FragmentStream`].
pub(crate) fn fragment_stream<S, B, E>(provider: &str, body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let state = SseState {
        provider: provider.to_string(),
        body: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((fragment, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain();
                }
                Some(Err(err)) => {
                    tracing::warn!(provider = %state.provider, "Stream interrupted: {err}");
                    state.finished = true;
                    state.pending.push_back(StreamFragment::Error(
                        super::sanitize_api_error(&err.to_string()),
                    ));
                }
                None => {
                    // Flush a final line that arrived without its newline.
                    if !state.buffer.is_empty() {
                        state.buffer.push(b'\n');
                        state.drain();
                    }
                    state.finished = true;
                }
            }
        }
    }))
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest::new(messages, model, temperature, false);
        let response = self.send(&request).await?;

        let chat_response: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(&e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: self.name.clone(),
            })
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f64,
    ) -> Result<FragmentStream, ProviderError> {
        let request = ChatRequest::new(messages, model, temperature, true);
        let response = self.send(&request).await?;
        Ok(fragment_stream(&self.name, response.bytes_stream()))
    }
}
