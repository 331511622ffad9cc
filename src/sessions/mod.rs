//! Session management: per-player conversation history and status.

pub mod in_memory;
pub mod traits;

use std::sync::Arc;

pub use in_memory::InMemorySessionStore;
pub use traits::{PlayerStatus, Role, Session, SessionHandle, SessionSlot, SessionStore, Turn};

/// Create a default in-memory session store.
pub fn create_session_store() -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new())
}
