use rusqlite::{params, Connection, Row};

use crate::db::models::{AuditAction, ProtocolAudit};
use crate::error::AppError;

fn row_to_audit(row: &Row) -> rusqlite::Result<ProtocolAudit> {
    Ok(ProtocolAudit {
        id: row.get("id")?,
        protocol_id: row.get("protocol_id")?,
        user_id: row.get("user_id")?,
        action: row.get("action")?,
        detail: row.get("detail")?,
        created_at: row.get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Insert (append-only: no update or delete functions)
// ---------------------------------------------------------------------------

/// Append an entry to a protocol's audit trail.
pub fn insert(
    conn: &Connection,
    protocol_id: &str,
    user_id: Option<&str>,
    action: AuditAction,
    detail: &serde_json::Value,
    now: &str,
) -> Result<(), AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let detail = if detail.is_null() {
        None
    } else {
        Some(serde_json::to_string(detail)?)
    };
    conn.execute(
        "INSERT INTO protocol_audits (id, protocol_id, user_id, action, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, protocol_id, user_id, action, detail, now],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Full trail for a protocol, oldest first.
pub fn get_by_protocol(conn: &Connection, protocol_id: &str) -> Result<Vec<ProtocolAudit>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM protocol_audits
         WHERE protocol_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![protocol_id], row_to_audit)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn count_by_action(
    conn: &Connection,
    protocol_id: &str,
    action: AuditAction,
) -> Result<i64, AppError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM protocol_audits WHERE protocol_id = ?1 AND action = ?2",
        params![protocol_id, action],
        |row| row.get(0),
    )?;
    Ok(count)
}
