//! Protocol rows. Functions take a `Connection` (or `Transaction`, which
//! derefs to one) so lifecycle operations can compose the mutation and its
//! audit entry in a single transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{AttendanceMode, Protocol, ProtocolStatus, SessionRef};
use crate::error::AppError;

fn row_to_protocol(row: &Row) -> rusqlite::Result<Protocol> {
    Ok(Protocol {
        id: row.get("id")?,
        number: row.get("number")?,
        instance_id: row.get("instance_id")?,
        session_id: row.get("session_id")?,
        contact_id: row.get("contact_id")?,
        contact_name: row.get("contact_name")?,
        channel: row.get("channel")?,
        status: row.get("status")?,
        mode: row.get("mode")?,
        escalation_reason: row.get("escalation_reason")?,
        escalated_at: row.get("escalated_at")?,
        escalation_count: row.get("escalation_count")?,
        assigned_user_id: row.get("assigned_user_id")?,
        assigned_at: row.get("assigned_at")?,
        closed_by: row.get("closed_by")?,
        closed_at: row.get("closed_at")?,
        close_reason: row.get("close_reason")?,
        close_result: row.get("close_result")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Protocol, AppError> {
    conn.query_row(
        "SELECT * FROM protocols WHERE id = ?1",
        params![id],
        row_to_protocol,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Protocol {id}")),
        other => AppError::Database(other),
    })
}

/// The newest non-closed protocol for a conversation, if any.
pub fn find_open_for_session(
    conn: &Connection,
    instance_id: &str,
    session_id: &str,
) -> Result<Option<Protocol>, AppError> {
    conn.query_row(
        "SELECT * FROM protocols
         WHERE instance_id = ?1 AND session_id = ?2 AND status != 'CLOSED'
         ORDER BY created_at DESC
         LIMIT 1",
        params![instance_id, session_id],
        row_to_protocol,
    )
    .optional()
    .map_err(AppError::Database)
}

pub fn insert(
    conn: &Connection,
    id: &str,
    number: &str,
    session: &SessionRef,
    now: &str,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO protocols
         (id, number, instance_id, session_id, contact_id, contact_name, channel,
          status, mode, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            number,
            session.instance_id,
            session.session_id,
            session.contact_id,
            session.contact_name,
            session.channel,
            ProtocolStatus::Active,
            AttendanceMode::AiOnly,
            now,
        ],
    )?;
    Ok(())
}

pub fn mark_escalated(conn: &Connection, id: &str, reason: &str, now: &str) -> Result<(), AppError> {
    conn.execute(
        "UPDATE protocols
         SET status = ?1,
             escalation_reason = ?2,
             escalated_at = ?3,
             escalation_count = escalation_count + 1,
             updated_at = ?3
         WHERE id = ?4",
        params![ProtocolStatus::Escalated, reason, now, id],
    )?;
    Ok(())
}

pub fn mark_assigned(
    conn: &Connection,
    id: &str,
    user_id: &str,
    mode: AttendanceMode,
    now: &str,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE protocols
         SET status = ?1,
             assigned_user_id = ?2,
             assigned_at = ?3,
             mode = ?4,
             updated_at = ?3
         WHERE id = ?5",
        params![ProtocolStatus::InProgress, user_id, now, mode, id],
    )?;
    Ok(())
}

/// Switch between the human modes. Status and assignment are untouched.
pub fn set_mode(conn: &Connection, id: &str, mode: AttendanceMode, now: &str) -> Result<(), AppError> {
    conn.execute(
        "UPDATE protocols SET mode = ?1, updated_at = ?2 WHERE id = ?3",
        params![mode, now, id],
    )?;
    Ok(())
}

/// Hand the conversation back to the AI: AI-only, unassigned, ACTIVE.
pub fn return_to_ai(conn: &Connection, id: &str, now: &str) -> Result<(), AppError> {
    conn.execute(
        "UPDATE protocols
         SET mode = ?1,
             status = ?2,
             assigned_user_id = NULL,
             assigned_at = NULL,
             updated_at = ?3
         WHERE id = ?4",
        params![AttendanceMode::AiOnly, ProtocolStatus::Active, now, id],
    )?;
    Ok(())
}

pub fn mark_closed(
    conn: &Connection,
    id: &str,
    user_id: Option<&str>,
    reason: Option<&str>,
    result: Option<&str>,
    now: &str,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE protocols
         SET status = ?1,
             mode = ?2,
             closed_by = ?3,
             closed_at = ?4,
             close_reason = ?5,
             close_result = ?6,
             updated_at = ?4
         WHERE id = ?7",
        params![
            ProtocolStatus::Closed,
            AttendanceMode::AiOnly,
            user_id,
            now,
            reason,
            result,
            id,
        ],
    )?;
    Ok(())
}

pub fn list_by_status(
    conn: &Connection,
    instance_id: &str,
    status: ProtocolStatus,
) -> Result<Vec<Protocol>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM protocols
         WHERE instance_id = ?1 AND status = ?2
         ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![instance_id, status], row_to_protocol)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// User who most recently closed an assigned protocol for this contact.
pub fn last_closer_for_contact(
    conn: &Connection,
    instance_id: &str,
    contact_id: &str,
) -> Result<Option<String>, AppError> {
    conn.query_row(
        "SELECT closed_by FROM protocols
         WHERE instance_id = ?1
           AND contact_id = ?2
           AND status = 'CLOSED'
           AND assigned_user_id IS NOT NULL
           AND closed_by IS NOT NULL
         ORDER BY closed_at DESC
         LIMIT 1",
        params![instance_id, contact_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(AppError::Database)
}
