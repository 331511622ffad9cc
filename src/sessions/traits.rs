//! Session storage traits and types for game conversation state.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Speaker of a single turn in the conversation history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
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

/// Minimal record of who the player is and what they have done.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub role: String,
    pub major_decisions: Vec<String>,
    pub assets: Vec<String>,
    pub relationships: Vec<String>,
}

/// A single player's ongoing conversation and game state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Chronological history replayed to the model on every turn.
    /// Never contains the rendered system prompt.
    pub messages: Vec<Turn>,
    /// Narrative summary. Nothing populates this yet.
    pub summary: String,
    pub player_status: PlayerStatus,
}

/// Shared slot for one session id.
///
/// `state` is only held for short, non-blocking mutations. `turn` is held by
/// the orchestrator for the whole duration of a turn so that turns on the same
/// id run one after another.
#[derive(Debug, Default)]
pub struct SessionSlot {
    state: Mutex<Session>,
    turn: tokio::sync::Mutex<()>,
}

impl SessionSlot {
    pub fn new(session: Session) -> Self {
        Self {
            state: Mutex::new(session),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> Session {
        self.state.lock().clone()
    }

    /// Apply a mutation under the state lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Wait for exclusive use of this session for one turn.
    pub async fn begin_turn(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.turn.lock().await
    }
}

pub type SessionHandle = Arc<SessionSlot>;

/// Keyed store of live sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the session for `id`, creating a default one if absent.
    async fn get_or_create(&self, id: &str) -> Result<SessionHandle>;

    /// Return the session for `id` if it exists.
    async fn get(&self, id: &str) -> Result<Option<SessionHandle>>;

    /// Replace the session for `id` with a fresh default. Succeeds for ids
    /// that were never seen.
    async fn reset(&self, id: &str) -> Result<SessionHandle>;

    /// Copy of the session state for `id`, if it exists.
    async fn snapshot(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.get(id).await?.map(|slot| slot.snapshot()))
    }

    /// Ids of all live sessions, sorted.
    async fn list_ids(&self) -> Result<Vec<String>>;

    /// Number of live sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_serializes_with_camel_case_fields() {
        let mut session = Session::default();
        session.player_status.major_decisions.push("joined guild".into());
        session.messages.push(Turn::user("hi"));

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["playerStatus"]["majorDecisions"][0], "joined guild");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["summary"], "");
    }

    #[test]
    fn role_round_trips_lowercase() {
        let role: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, Role::Assistant);
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn slot_update_is_visible_in_snapshot() {
        let slot = SessionSlot::new(Session::default());
        slot.update(|s| s.messages.push(Turn::assistant("done")));
        assert_eq!(slot.snapshot().messages, vec![Turn::assistant("done")]);
    }

    #[tokio::test]
    async fn turn_lock_is_exclusive() {
        let slot = SessionSlot::new(Session::default());
        let guard = slot.begin_turn().await;
        assert!(slot.turn.try_lock().is_err());
        drop(guard);
        assert!(slot.turn.try_lock().is_ok());
    }
}
