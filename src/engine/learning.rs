//! Learning capture: when an escalated protocol closes, pair the AI's last
//! turns with what the human actually did so the pair can later feed
//! retraining or prompt refinement.

use std::time::Duration;

use crate::db::models::{LearningPacket, MessageKind, NewLearningPacket, Protocol};
use crate::db::repos::{instances, learning as repo, messages};
use crate::db::DbPool;
use crate::error::AppError;
use crate::runtime::{ConversationTurn, Role, SessionReader};

pub const NO_HUMAN_RESPONSE: &str = "No human response recorded";

/// How many trailing assistant turns make up the AI context.
const CONTEXT_TURNS: usize = 5;
const CONTEXT_SEPARATOR: &str = "\n---\n";
const TRANSCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capture and log. Never fails the caller.
pub async fn capture_best_effort(pool: &DbPool, reader: &dyn SessionReader, protocol: &Protocol) {
    match capture(pool, reader, protocol).await {
        Ok(packet) => {
            tracing::info!(
                protocol_id = %protocol.id,
                packet_id = %packet.id,
                "Learning packet captured"
            );
        }
        Err(e) => {
            tracing::warn!(
                protocol_id = %protocol.id,
                kind = e.kind(),
                "Learning capture failed: {}",
                e
            );
        }
    }
}

pub async fn capture(
    pool: &DbPool,
    reader: &dyn SessionReader,
    protocol: &Protocol,
) -> Result<LearningPacket, AppError> {
    let reason = protocol
        .escalation_reason
        .clone()
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("Protocol {} was never escalated", protocol.number)))?;

    let contents: Vec<String> = {
        let conn = pool.get()?;
        messages::get_by_protocol(&conn, &protocol.id)?
            .into_iter()
            .filter(|m| is_human_kind(m.kind))
            .map(|m| m.content)
            .collect()
    };

    let ai_context = fetch_ai_context(pool, reader, protocol)
        .await
        .unwrap_or_else(|| transcript_fallback(protocol));

    let conn = pool.get()?;
    repo::insert(
        &conn,
        NewLearningPacket {
            protocol_id: protocol.id.clone(),
            instance_id: protocol.instance_id.clone(),
            escalation_reason: reason.clone(),
            ai_context,
            human_response: join_human_response(&contents),
            resolution: protocol.close_result.clone(),
            tags: vec![reason],
        },
    )
}

/// `None` means "use the fallback"; the cause is logged here.
async fn fetch_ai_context(
    pool: &DbPool,
    reader: &dyn SessionReader,
    protocol: &Protocol,
) -> Option<String> {
    let instance = match instances::get_by_id(pool, &protocol.instance_id) {
        Ok(instance) => instance,
        Err(e) => {
            tracing::warn!(protocol_id = %protocol.id, "Instance lookup failed: {}", e);
            return None;
        }
    };
    let (host, container) = instance.container()?;

    let fetch = reader.get_session_messages(host, container, &protocol.session_id);
    match tokio::time::timeout(TRANSCRIPT_TIMEOUT, fetch).await {
        Ok(Ok(turns)) => assistant_context(&turns),
        Ok(Err(e)) => {
            tracing::warn!(protocol_id = %protocol.id, "Transcript fetch failed: {}", e);
            None
        }
        Err(_) => {
            tracing::warn!(protocol_id = %protocol.id, "Transcript fetch timed out");
            None
        }
    }
}

/// The last few non-empty assistant turns, oldest first.
pub fn assistant_context(turns: &[ConversationTurn]) -> Option<String> {
    let mut recent: Vec<String> = turns
        .iter()
        .rev()
        .filter(|t| t.role == Role::Assistant)
        .map(|t| t.text())
        .filter(|text| !text.trim().is_empty())
        .take(CONTEXT_TURNS)
        .collect();
    if recent.is_empty() {
        return None;
    }
    recent.reverse();
    Some(recent.join(CONTEXT_SEPARATOR))
}

/// Only what an attendant wrote counts as the human response.
fn is_human_kind(kind: MessageKind) -> bool {
    matches!(kind, MessageKind::Note | MessageKind::DirectMessage)
}

fn join_human_response(contents: &[String]) -> String {
    if contents.is_empty() {
        NO_HUMAN_RESPONSE.to_string()
    } else {
        contents.join("\n")
    }
}

fn transcript_fallback(protocol: &Protocol) -> String {
    format!(
        "Transcript unavailable for session {} (contact {})",
        protocol.session_id, protocol.contact_id
    )
}
