//! Read-only access to the conversational-AI runtime that owns session
//! transcripts. Addressed per instance by container host + container name.

pub mod client;
pub mod types;

#[cfg(test)]
pub mod fake;

use crate::error::AppError;

pub use types::{ContentBlock, ConversationTurn, MessageContent, Role, SessionSummary};

#[async_trait::async_trait]
pub trait SessionReader: Send + Sync + 'static {
    async fn list_sessions(&self, host: &str, container: &str) -> Result<Vec<SessionSummary>, AppError>;

    async fn get_session_messages(
        &self,
        host: &str,
        container: &str,
        session_id: &str,
    ) -> Result<Vec<ConversationTurn>, AppError>;
}
