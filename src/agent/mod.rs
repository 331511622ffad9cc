//! Narrative game master: prompt composition and streamed conversation turns.

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::{ConversationOrchestrator, TurnEvent, TurnRequest, TurnSettings, TurnStream};
pub use prompt::{compose_system_prompt, WELCOME_MESSAGE};
