//! In-memory `SessionReader` for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::AppError;

use super::types::{ConversationTurn, MessageContent, Role, SessionOrigin, SessionSummary};
use super::SessionReader;

#[derive(Default)]
pub struct FakeSessionReader {
    sessions: Mutex<HashMap<String, Vec<SessionSummary>>>,
    messages: Mutex<HashMap<String, Vec<ConversationTurn>>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    pub message_fetches: AtomicU64,
}

impl FakeSessionReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sessions(&self, container: &str, sessions: Vec<SessionSummary>) {
        self.sessions.lock().unwrap().insert(container.to_string(), sessions);
    }

    pub fn set_messages(&self, session_id: &str, turns: Vec<ConversationTurn>) {
        self.messages.lock().unwrap().insert(session_id.to_string(), turns);
    }

    /// Transcript fetches for this session return a runtime error.
    pub fn fail_session(&self, session_id: &str) {
        self.failing.lock().unwrap().insert(session_id.to_string());
    }

    /// Transcript fetches for this session never complete.
    pub fn hang_session(&self, session_id: &str) {
        self.hanging.lock().unwrap().insert(session_id.to_string());
    }

    /// Session listing for this container returns a runtime error.
    pub fn make_unreachable(&self, container: &str) {
        self.unreachable.lock().unwrap().insert(container.to_string());
    }

    pub fn fetches(&self) -> u64 {
        self.message_fetches.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl SessionReader for FakeSessionReader {
    async fn list_sessions(&self, _host: &str, container: &str) -> Result<Vec<SessionSummary>, AppError> {
        if self.unreachable.lock().unwrap().contains(container) {
            return Err(AppError::Runtime(format!("{container} unreachable")));
        }
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(container)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_session_messages(
        &self,
        _host: &str,
        _container: &str,
        session_id: &str,
    ) -> Result<Vec<ConversationTurn>, AppError> {
        self.message_fetches.fetch_add(1, Ordering::Relaxed);
        if self.failing.lock().unwrap().contains(session_id) {
            return Err(AppError::Runtime(format!("transcript for {session_id} unavailable")));
        }
        let hang = self.hanging.lock().unwrap().contains(session_id);
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn session(id: &str, from: &str, updated_at: DateTime<Utc>) -> SessionSummary {
    SessionSummary {
        session_id: id.to_string(),
        updated_at,
        origin: Some(SessionOrigin {
            from: Some(from.to_string()),
            label: None,
        }),
        key: format!("agent:main:whatsapp:{from}"),
        last_channel: Some("whatsapp".into()),
    }
}

pub fn user(text: &str) -> ConversationTurn {
    ConversationTurn {
        role: Role::User,
        content: MessageContent::Text(text.to_string()),
    }
}

pub fn assistant(text: &str) -> ConversationTurn {
    ConversationTurn {
        role: Role::Assistant,
        content: MessageContent::Text(text.to_string()),
    }
}
