use rusqlite::{params, Connection, Row};

use crate::db::models::{MessageKind, ProtocolMessage};
use crate::error::AppError;

fn row_to_message(row: &Row) -> rusqlite::Result<ProtocolMessage> {
    Ok(ProtocolMessage {
        id: row.get("id")?,
        protocol_id: row.get("protocol_id")?,
        user_id: row.get("user_id")?,
        kind: row.get("kind")?,
        content: row.get("content")?,
        metadata: row.get("metadata")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert(
    conn: &Connection,
    protocol_id: &str,
    user_id: Option<&str>,
    kind: MessageKind,
    content: &str,
    metadata: Option<&str>,
    now: &str,
) -> Result<ProtocolMessage, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO protocol_messages (id, protocol_id, user_id, kind, content, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, protocol_id, user_id, kind, content, metadata, now],
    )?;
    Ok(ProtocolMessage {
        id,
        protocol_id: protocol_id.to_string(),
        user_id: user_id.map(String::from),
        kind,
        content: content.to_string(),
        metadata: metadata.map(String::from),
        created_at: now.to_string(),
    })
}

/// Messages logged against a protocol, in the order they were written.
pub fn get_by_protocol(conn: &Connection, protocol_id: &str) -> Result<Vec<ProtocolMessage>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM protocol_messages
         WHERE protocol_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![protocol_id], row_to_message)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
