//! Single-shot game events: random encounters and the outcome of the
//! player's response to them.
//!
//! Both calls are stateless. They never touch session history, and a model
//! reply that cannot be decoded is replaced by a fixed fallback payload.

pub mod choice;
pub mod decode;
pub mod random;

pub use choice::EventChoiceRequest;
pub use decode::{decode_object, decode_with_fallback, strip_code_fence, MalformedOutput};
pub use random::RandomEventRequest;

use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::providers::{ChatMessage, Provider, ProviderError};

/// Request body problems detected before the provider is contacted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventRequestError {
    #[error("No data provided")]
    NoData,
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Render a JSON value the way it should read inside a prompt.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Generates event payloads through a [`Provider`].
#[derive(Clone)]
pub struct EventGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    random_event_temperature: f64,
    event_choice_temperature: f64,
}

impl EventGenerator {
    pub fn new(provider: Arc<dyn Provider>, config: &Config) -> Self {
        Self {
            provider,
            model: config.default_model.clone(),
            random_event_temperature: config.events.random_event_temperature,
            event_choice_temperature: config.events.event_choice_temperature,
        }
    }

    /// Ask for a random event. Provider failures are returned; unusable
    /// replies become [`random::fallback_event`].
    pub async fn random_event(&self, request: &RandomEventRequest) -> Result<Value, ProviderError> {
        let messages = [
            ChatMessage::system(request.system_prompt()),
            ChatMessage::user(request.user_prompt()),
        ];
        let reply = self
            .provider
            .chat_with_history(&messages, &self.model, self.random_event_temperature)
            .await?;
        tracing::debug!(provider = self.provider.name(), "Random event reply received");

        Ok(decode_with_fallback(
            &reply,
            &random::REQUIRED_KEYS,
            random::fallback_event,
        ))
    }

    /// Ask for the outcome of accepting or declining an event.
    pub async fn event_choice(&self, request: &EventChoiceRequest) -> Result<Value, ProviderError> {
        let messages = [
            ChatMessage::system(request.system_prompt()),
            ChatMessage::user(request.user_prompt()),
        ];
        let reply = self
            .provider
            .chat_with_history(&messages, &self.model, self.event_choice_temperature)
            .await?;
        tracing::debug!(
            provider = self.provider.name(),
            accepted = request.accepted,
            "Event choice reply received"
        );

        Ok(decode_with_fallback(&reply, &choice::REQUIRED_KEYS, || {
            request.fallback()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::{Script, ScriptedProvider};
    use serde_json::json;

    fn generator(scripts: Vec<Script>) -> (EventGenerator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        (EventGenerator::new(provider.clone(), &Config::default()), provider)
    }

    fn random_request() -> RandomEventRequest {
        RandomEventRequest::from_json(&json!({
            "money": 100,
            "reputation": 0,
            "playerAction": "散步",
            "context": ""
        }))
        .unwrap()
    }

    #[test]
    fn truthiness_follows_json_semantics() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(2)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&Value::Null));
    }

    #[tokio::test]
    async fn random_event_passes_decoded_reply_through() {
        let (events, provider) = generator(vec![Script::Reply(
            "```json\n{\"type\":\"random_event\",\"title\":\"决斗\",\"description\":\"一名骑士向你发起挑战\"}\n```",
        )]);

        let event = events.random_event(&random_request()).await.unwrap();

        assert_eq!(event["title"], "决斗");
        let sent = &provider.requests()[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, "system");
        assert!(sent[1].content.contains("玩家行为：散步"));
    }

    #[tokio::test]
    async fn random_event_falls_back_on_incomplete_reply() {
        let (events, _) = generator(vec![Script::Reply(r#"{"title":"只有标题"}"#)]);
        let event = events.random_event(&random_request()).await.unwrap();
        assert_eq!(event, random::fallback_event());
    }

    #[tokio::test]
    async fn random_event_surfaces_provider_failure() {
        let (events, _) = generator(vec![Script::OpenError(500, "upstream down")]);
        let err = events.random_event(&random_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Open { status: 500, .. }));
    }

    #[tokio::test]
    async fn event_choice_falls_back_with_decision_effects() {
        let (events, _) = generator(vec![Script::Reply("当然！你获得了金币")]);
        let request = EventChoiceRequest::from_json(&json!({"accepted": true})).unwrap();

        let outcome = events.event_choice(&request).await.unwrap();

        assert_eq!(outcome["effects"], json!({"money": 10, "reputation": 5}));
    }

    #[tokio::test]
    async fn event_choice_returns_model_outcome() {
        let (events, _) = generator(vec![Script::Reply(
            r#"{"message":"你赢得了尊重","effects":{"money":-5,"reputation":20}}"#,
        )]);
        let request = EventChoiceRequest::from_json(&json!({"accepted": false})).unwrap();

        let outcome = events.event_choice(&request).await.unwrap();

        assert_eq!(outcome["message"], "你赢得了尊重");
        assert_eq!(outcome["effects"]["reputation"], 20);
    }
}
