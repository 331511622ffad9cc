//! Session-scoped streaming conversation turns.
//!
//! A turn appends the player's input to the session, asks the provider for a
//! streamed reply, forwards every fragment to the caller as soon as it
//! arrives and commits the assembled reply as one assistant turn once the
//! stream has ended cleanly. Failed, timed-out or abandoned turns commit
//! nothing beyond the player's input.

use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::prompt::{compose_system_prompt, WELCOME_MESSAGE};
use crate::config::Config;
use crate::providers::{ChatMessage, Provider, ProviderError, StreamFragment};
use crate::sessions::{SessionHandle, SessionStore, Turn};

/// Input for one conversation turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub session_id: String,
    /// Player input. May be empty when only `event_context` is supplied.
    pub message: String,
    /// Narrated consequences of a game event, injected as a system turn.
    pub event_context: String,
    /// Start over with the welcome narrative.
    pub is_initial: bool,
}

/// Outbound event. Serializes as `{"content": ..}` or `{"error": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnEvent {
    Content(String),
    Error(String),
}

pub type TurnStream = ReceiverStream<TurnEvent>;

/// Model and limits applied to every turn.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub temperature: f64,
    /// Upper bound from opening the request to the first fragment.
    pub first_fragment_timeout: Duration,
    /// Upper bound for the whole reply.
    pub total_timeout: Duration,
    /// Fragments buffered for a slow reader before the provider is paused.
    pub channel_capacity: usize,
}

impl TurnSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            first_fragment_timeout: Duration::from_secs(config.stream.first_fragment_timeout_secs),
            total_timeout: Duration::from_secs(config.stream.total_timeout_secs),
            channel_capacity: config.stream.channel_capacity,
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum TurnOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Owns the turn lifecycle for every session in a store.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn Provider>,
    settings: TurnSettings,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn Provider>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    /// Run one turn in the background and return its outbound events.
    ///
    /// Dropping the returned stream cancels the turn.
    pub fn handle_turn(&self, request: TurnRequest) -> TurnStream {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let this = self.clone();
        tokio::spawn(async move {
            this.run_turn(request, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run_turn(&self, request: TurnRequest, tx: mpsc::Sender<TurnEvent>) {
        let session_id = request.session_id.as_str();

        let slot = match self.store.get(session_id).await {
            Ok(Some(slot)) if !request.is_initial => slot,
            Ok(_) => {
                self.welcome(session_id, &tx).await;
                return;
            }
            Err(err) => {
                warn!(session_id, "Session lookup failed: {err:#}");
                let _ = tx.send(TurnEvent::Error(err.to_string())).await;
                return;
            }
        };

        let _turn = tokio::select! {
            guard = slot.begin_turn() => guard,
            () = tx.closed() => {
                debug!(session_id, "Caller left while waiting for the previous turn");
                return;
            }
        };

        let messages = record_input(&slot, &request);
        debug!(
            session_id,
            history = messages.len() - 1,
            has_event_context = !request.event_context.is_empty(),
            "Turn started"
        );

        match self.stream_reply(&messages, &tx).await {
            TurnOutcome::Completed(reply) => {
                let chars = reply.chars().count();
                slot.update(|session| session.messages.push(Turn::assistant(reply)));
                info!(session_id, reply_chars = chars, "Turn completed");
            }
            TurnOutcome::Failed(message) => {
                warn!(session_id, provider = self.provider.name(), "Turn failed: {message}");
                let _ = tx.send(TurnEvent::Error(message)).await;
            }
            TurnOutcome::Cancelled => {
                info!(session_id, "Turn cancelled by caller");
            }
        }
    }

    async fn welcome(&self, session_id: &str, tx: &mpsc::Sender<TurnEvent>) {
        match self.store.reset(session_id).await {
            Ok(_) => {
                info!(session_id, "New game started");
                let _ = tx.send(TurnEvent::Content(WELCOME_MESSAGE.to_string())).await;
            }
            Err(err) => {
                warn!(session_id, "Session reset failed: {err:#}");
                let _ = tx.send(TurnEvent::Error(err.to_string())).await;
            }
        }
    }

    fn timeout_error(&self, stage: &'static str) -> String {
        ProviderError::Timeout {
            provider: self.provider.name().to_string(),
            stage,
        }
        .to_string()
    }

    /// Forward provider fragments to `tx` and assemble the reply.
    async fn stream_reply(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<TurnEvent>,
    ) -> TurnOutcome {
        let started = Instant::now();
        let deadline = started + self.settings.total_timeout;
        let first_deadline = (started + self.settings.first_fragment_timeout).min(deadline);

        let open = self
            .provider
            .stream_chat(messages, &self.settings.model, self.settings.temperature);
        let mut fragments = tokio::select! {
            opened = tokio::time::timeout_at(first_deadline, open) => match opened {
                Ok(Ok(fragments)) => fragments,
                Ok(Err(err)) => return TurnOutcome::Failed(err.to_string()),
                Err(_) => return TurnOutcome::Failed(self.timeout_error("waiting for the first fragment")),
            },
            () = tx.closed() => return TurnOutcome::Cancelled,
        };

        let mut reply = String::new();
        let mut received = false;

        loop {
            let (wait_until, stage) = if received {
                (deadline, "before the reply finished")
            } else {
                (first_deadline, "waiting for the first fragment")
            };

            let next = tokio::select! {
                next = tokio::time::timeout_at(wait_until, fragments.next()) => next,
                () = tx.closed() => return TurnOutcome::Cancelled,
            };

            match next {
                Err(_) => return TurnOutcome::Failed(self.timeout_error(stage)),
                Ok(None) => return TurnOutcome::Completed(reply),
                Ok(Some(StreamFragment::Text(text))) => {
                    received = true;
                    reply.push_str(&text);
                    if tx.send(TurnEvent::Content(text)).await.is_err() {
                        return TurnOutcome::Cancelled;
                    }
                }
                Ok(Some(StreamFragment::Error(message))) => {
                    return TurnOutcome::Failed(
                        ProviderError::Stream {
                            provider: self.provider.name().to_string(),
                            message,
                        }
                        .to_string(),
                    );
                }
            }
        }
    }
}

/// Append the turn's input to history and build the provider request.
fn record_input(slot: &SessionHandle, request: &TurnRequest) -> Vec<ChatMessage> {
    slot.update(|session| {
        if !request.event_context.is_empty() {
            session
                .messages
                .push(Turn::system(request.event_context.clone()));
        }
        session.messages.push(Turn::user(request.message.clone()));

        let mut messages = Vec::with_capacity(session.messages.len() + 1);
        messages.push(ChatMessage::system(compose_system_prompt(session)));
        messages.extend(session.messages.iter().map(ChatMessage::from));
        messages
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::{Script, ScriptedProvider};
    use crate::sessions::{create_session_store, Role, Session};

    fn settings() -> TurnSettings {
        TurnSettings {
            model: "test-model".into(),
            temperature: 0.7,
            first_fragment_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(10),
            channel_capacity: 8,
        }
    }

    fn setup(scripts: Vec<Script>) -> (ConversationOrchestrator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let orchestrator =
            ConversationOrchestrator::new(create_session_store(), provider.clone(), settings());
        (orchestrator, provider)
    }

    fn turn(session_id: &str, message: &str) -> TurnRequest {
        TurnRequest {
            session_id: session_id.into(),
            message: message.into(),
            ..TurnRequest::default()
        }
    }

    async fn run(orchestrator: &ConversationOrchestrator, request: TurnRequest) -> Vec<TurnEvent> {
        orchestrator.handle_turn(request).collect().await
    }

    async fn history(orchestrator: &ConversationOrchestrator, id: &str) -> Vec<Turn> {
        orchestrator
            .store()
            .snapshot(id)
            .await
            .unwrap()
            .expect("session should exist")
            .messages
    }

    fn content(text: &str) -> TurnEvent {
        TurnEvent::Content(text.into())
    }

    #[test]
    fn turn_event_serializes_as_single_key_object() {
        let json = serde_json::to_string(&content("hi")).unwrap();
        assert_eq!(json, r#"{"content":"hi"}"#);
        let json = serde_json::to_string(&TurnEvent::Error("boom".into())).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[tokio::test]
    async fn unseen_session_gets_welcome_without_provider_call() {
        let (orchestrator, provider) = setup(vec![]);

        let events = run(&orchestrator, turn("new-player", "hello")).await;

        assert_eq!(events, vec![content(WELCOME_MESSAGE)]);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(
            orchestrator.store().snapshot("new-player").await.unwrap(),
            Some(Session::default())
        );
    }

    #[tokio::test]
    async fn initial_flag_resets_existing_session() {
        let (orchestrator, provider) = setup(vec![Script::Fragments(vec!["ok"])]);
        orchestrator.store().get_or_create("p").await.unwrap();
        run(&orchestrator, turn("p", "go north")).await;
        assert_eq!(history(&orchestrator, "p").await.len(), 2);

        let request = TurnRequest {
            is_initial: true,
            ..turn("p", "")
        };
        let events = run(&orchestrator, request).await;

        assert_eq!(events, vec![content(WELCOME_MESSAGE)]);
        assert!(history(&orchestrator, "p").await.is_empty());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn fragments_stream_in_order_and_commit_once() {
        let (orchestrator, _) = setup(vec![Script::Fragments(vec!["A", "B", "C"])]);
        orchestrator.store().get_or_create("p").await.unwrap();

        let events = run(&orchestrator, turn("p", "hello")).await;

        assert_eq!(events, vec![content("A"), content("B"), content("C")]);
        assert_eq!(
            history(&orchestrator, "p").await,
            vec![Turn::user("hello"), Turn::assistant("ABC")]
        );
    }

    #[tokio::test]
    async fn system_prompt_is_sent_but_not_stored() {
        let (orchestrator, provider) = setup(vec![Script::Fragments(vec!["x"])]);
        let slot = orchestrator.store().get_or_create("p").await.unwrap();
        slot.update(|s| s.player_status.role = "商人".into());

        run(&orchestrator, turn("p", "hello")).await;

        let sent = &provider.requests()[0];
        assert_eq!(sent[0].role, "system");
        assert!(sent[0].content.contains("玩家角色：商人"));
        assert_eq!(sent[1], ChatMessage::user("hello"));
        assert!(history(&orchestrator, "p")
            .await
            .iter()
            .all(|t| t.role != Role::System));
    }

    #[tokio::test]
    async fn open_failure_yields_one_error_and_keeps_user_turn() {
        let (orchestrator, _) = setup(vec![Script::OpenError(401, "invalid key")]);
        orchestrator.store().get_or_create("p").await.unwrap();

        let events = run(&orchestrator, turn("p", "hello")).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TurnEvent::Error(msg) if msg.contains("invalid key")));
        assert_eq!(history(&orchestrator, "p").await, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_delivered_fragments_but_commits_nothing() {
        let (orchestrator, _) = setup(vec![Script::FailAfter(vec!["A", "B"], "reset by peer")]);
        orchestrator.store().get_or_create("p").await.unwrap();

        let events = run(&orchestrator, turn("p", "hello")).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[..2], [content("A"), content("B")]);
        assert!(matches!(&events[2], TurnEvent::Error(msg) if msg.contains("reset by peer")));
        assert_eq!(history(&orchestrator, "p").await, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn empty_reply_still_commits_assistant_turn() {
        let (orchestrator, _) = setup(vec![Script::Fragments(vec![])]);
        orchestrator.store().get_or_create("p").await.unwrap();

        let events = run(&orchestrator, turn("p", "...")).await;

        assert!(events.is_empty());
        assert_eq!(
            history(&orchestrator, "p").await,
            vec![Turn::user("..."), Turn::assistant("")]
        );
    }

    #[tokio::test]
    async fn history_grows_by_two_per_turn_plus_event_context() {
        let (orchestrator, _) = setup(vec![
            Script::Fragments(vec!["one"]),
            Script::Fragments(vec!["two"]),
            Script::Fragments(vec!["three"]),
        ]);
        orchestrator.store().get_or_create("p").await.unwrap();

        run(&orchestrator, turn("p", "first")).await;
        let with_event = TurnRequest {
            event_context: "你在路上捡到了钱袋（金钱+20）".into(),
            ..turn("p", "second")
        };
        run(&orchestrator, with_event).await;
        run(&orchestrator, turn("p", "third")).await;

        let messages = history(&orchestrator, "p").await;
        assert_eq!(messages.len(), 2 * 3 + 1);
        assert_eq!(messages[2], Turn::system("你在路上捡到了钱袋（金钱+20）"));
        assert_eq!(messages[3], Turn::user("second"));
    }

    #[tokio::test]
    async fn event_context_only_turn_is_valid() {
        let (orchestrator, provider) = setup(vec![Script::Fragments(vec!["后果"])]);
        orchestrator.store().get_or_create("p").await.unwrap();

        let request = TurnRequest {
            event_context: "玩家接受了挑战".into(),
            ..turn("p", "")
        };
        run(&orchestrator, request).await;

        assert_eq!(
            history(&orchestrator, "p").await,
            vec![
                Turn::system("玩家接受了挑战"),
                Turn::user(""),
                Turn::assistant("后果")
            ]
        );
        assert_eq!(provider.requests()[0].len(), 3);
    }

    #[tokio::test]
    async fn silent_provider_times_out_without_commit() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Hang]));
        let orchestrator = ConversationOrchestrator::new(
            create_session_store(),
            provider,
            TurnSettings {
                first_fragment_timeout: Duration::from_millis(50),
                ..settings()
            },
        );
        orchestrator.store().get_or_create("p").await.unwrap();

        let events = run(&orchestrator, turn("p", "hello")).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TurnEvent::Error(msg) if msg.contains("timed out")));
        assert_eq!(history(&orchestrator, "p").await, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn total_deadline_cuts_off_slow_reply_without_commit() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Slow(
            vec!["A", "B", "C", "D", "E"],
            Duration::from_millis(100),
        )]));
        let orchestrator = ConversationOrchestrator::new(
            create_session_store(),
            provider,
            TurnSettings {
                total_timeout: Duration::from_millis(250),
                ..settings()
            },
        );
        orchestrator.store().get_or_create("p").await.unwrap();

        let events = run(&orchestrator, turn("p", "hi")).await;

        let (last, delivered) = events.split_last().unwrap();
        assert!(
            matches!(last, TurnEvent::Error(msg) if msg.contains("before the reply finished")),
            "unexpected final event: {last:?}"
        );
        assert!(!delivered.is_empty() && delivered.len() < 5);
        assert!(delivered.iter().all(|event| matches!(event, TurnEvent::Content(_))));
        assert_eq!(delivered[0], content("A"));
        assert_eq!(history(&orchestrator, "p").await, vec![Turn::user("hi")]);
    }

    #[tokio::test]
    async fn dropped_caller_cancels_turn_without_commit() {
        let (orchestrator, _) = setup(vec![Script::Slow(
            vec!["A", "B", "C", "D"],
            Duration::from_millis(20),
        )]);
        let slot = orchestrator.store().get_or_create("p").await.unwrap();

        let mut events = orchestrator.handle_turn(turn("p", "hello"));
        assert_eq!(events.next().await, Some(content("A")));
        drop(events);

        // The turn lock is released only once the background turn has ended.
        let _done = slot.begin_turn().await;
        assert_eq!(slot.snapshot().messages, vec![Turn::user("hello")]);
    }

    #[tokio::test]
    async fn distinct_sessions_do_not_share_history() {
        let (orchestrator, _) = setup(vec![
            Script::Slow(vec!["x1", "x2"], Duration::from_millis(10)),
            Script::Slow(vec!["y1", "y2"], Duration::from_millis(10)),
        ]);
        orchestrator.store().get_or_create("x").await.unwrap();
        orchestrator.store().get_or_create("y").await.unwrap();

        let (a, b) = tokio::join!(
            run(&orchestrator, turn("x", "from x")),
            run(&orchestrator, turn("y", "from y")),
        );
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);

        let x = history(&orchestrator, "x").await;
        let y = history(&orchestrator, "y").await;
        assert_eq!(x[0], Turn::user("from x"));
        assert_eq!(y[0], Turn::user("from y"));
        assert_eq!(x.len(), 2);
        assert_eq!(y.len(), 2);
        assert_ne!(x[1], y[1]);
    }

    #[tokio::test]
    async fn same_session_turns_are_serialized() {
        let (orchestrator, _) = setup(vec![
            Script::Slow(vec!["a", "b"], Duration::from_millis(20)),
            Script::Slow(vec!["c", "d"], Duration::from_millis(20)),
        ]);
        orchestrator.store().get_or_create("p").await.unwrap();

        let (first, second) = tokio::join!(
            run(&orchestrator, turn("p", "one")),
            run(&orchestrator, turn("p", "two")),
        );
        assert_eq!(first.len() + second.len(), 4);

        let messages = history(&orchestrator, "p").await;
        let roles: Vec<Role> = messages.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(messages[1].content, "ab");
        assert_eq!(messages[3].content, "cd");
    }
}
