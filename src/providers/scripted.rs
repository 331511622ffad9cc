//! Scripted provider for deterministic tests without network access.

use async_trait::async_trait;
use futures::stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::traits::{ChatMessage, FragmentStream, Provider, ProviderError, StreamFragment};

/// Pre-programmed behaviour for one provider call.
pub enum Script {
    /// Stream these fragments, then end cleanly.
    Fragments(Vec<&'static str>),
    /// Stream these fragments, then fail mid-stream.
    FailAfter(Vec<&'static str>, &'static str),
    /// Refuse to open the stream.
    OpenError(u16, &'static str),
    /// Wait between fragments.
    Slow(Vec<&'static str>, Duration),
    /// Never produce anything.
    Hang,
    /// Single-shot reply for `chat_with_history`.
    Reply(&'static str),
}

/// Provider that replays scripts in order and records every request.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    fn next_script(&self, messages: &[ChatMessage]) -> Option<Script> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(messages.to_vec());
        self.scripts.lock().pop_front()
    }
}

fn texts(fragments: Vec<&'static str>) -> Vec<StreamFragment> {
    fragments
        .into_iter()
        .map(|f| StreamFragment::Text(f.to_string()))
        .collect()
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_with_history(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f64,
    ) -> Result<String, ProviderError> {
        match self.next_script(messages) {
            Some(Script::Reply(text)) => Ok(text.to_string()),
            Some(Script::Fragments(parts)) => Ok(parts.concat()),
            Some(Script::OpenError(status, body)) => Err(ProviderError::Open {
                provider: "scripted".into(),
                status,
                body: body.into(),
            }),
            _ => Err(ProviderError::EmptyResponse {
                provider: "scripted".into(),
            }),
        }
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f64,
    ) -> Result<FragmentStream, ProviderError> {
        match self.next_script(messages) {
            Some(Script::Fragments(parts)) => Ok(Box::pin(stream::iter(texts(parts)))),
            Some(Script::FailAfter(parts, message)) => {
                let mut items = texts(parts);
                items.push(StreamFragment::Error(message.to_string()));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(Script::Slow(parts, delay)) => Ok(Box::pin(
                stream::iter(texts(parts)).then(move |fragment| async move {
                    tokio::time::sleep(delay).await;
                    fragment
                }),
            )),
            Some(Script::Hang) => Ok(Box::pin(stream::pending())),
            Some(Script::OpenError(status, body)) => Err(ProviderError::Open {
                provider: "scripted".into(),
                status,
                body: body.into(),
            }),
            Some(Script::Reply(_)) | None => Err(ProviderError::Transport {
                provider: "scripted".into(),
                message: "no script configured".into(),
            }),
        }
    }
}
