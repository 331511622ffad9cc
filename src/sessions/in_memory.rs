//! In-memory session store implementation.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::traits::{Session, SessionHandle, SessionSlot, SessionStore};

/// An in-memory session store backed by a mutex-protected hash map.
///
/// Entries live until they are reset or the process exits.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, id: &str) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock();
        let slot = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = id, "Creating session");
                Arc::new(SessionSlot::new(Session::default()))
            })
            .clone();
        Ok(slot)
    }

    async fn get(&self, id: &str) -> Result<Option<SessionHandle>> {
        let sessions = self.sessions.lock();
        Ok(sessions.get(id).cloned())
    }

    async fn reset(&self, id: &str) -> Result<SessionHandle> {
        let slot = Arc::new(SessionSlot::new(Session::default()));
        let mut sessions = self.sessions.lock();
        let previous = sessions.insert(id.to_string(), slot.clone());
        tracing::debug!(
            session_id = id,
            replaced = previous.is_some(),
            "Session reset"
        );
        Ok(slot)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.lock();
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
