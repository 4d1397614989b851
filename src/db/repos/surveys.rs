use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{PendingSurvey, SatisfactionSurvey};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_survey(row: &Row) -> rusqlite::Result<SatisfactionSurvey> {
    Ok(SatisfactionSurvey {
        id: row.get("id")?,
        protocol_id: row.get("protocol_id")?,
        sent_by: row.get("sent_by")?,
        sent_at: row.get("sent_at")?,
        rating: row.get("rating")?,
        comment: row.get("comment")?,
        answered_at: row.get("answered_at")?,
    })
}

pub fn insert(
    conn: &Connection,
    protocol_id: &str,
    sent_by: Option<&str>,
    now: &str,
) -> Result<SatisfactionSurvey, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO satisfaction_surveys (id, protocol_id, sent_by, sent_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, protocol_id, sent_by, now],
    )?;
    Ok(SatisfactionSurvey {
        id,
        protocol_id: protocol_id.to_string(),
        sent_by: sent_by.map(String::from),
        sent_at: now.to_string(),
        rating: None,
        comment: None,
        answered_at: None,
    })
}

pub fn get_by_protocol(
    conn: &Connection,
    protocol_id: &str,
) -> Result<Option<SatisfactionSurvey>, AppError> {
    conn.query_row(
        "SELECT * FROM satisfaction_surveys WHERE protocol_id = ?1",
        params![protocol_id],
        row_to_survey,
    )
    .optional()
    .map_err(AppError::Database)
}

/// Record the answer. Returns false when the survey was already answered.
pub fn record_answer(
    conn: &Connection,
    protocol_id: &str,
    rating: u8,
    comment: Option<&str>,
    now: &str,
) -> Result<bool, AppError> {
    let rows = conn.execute(
        "UPDATE satisfaction_surveys
         SET rating = ?1, comment = ?2, answered_at = ?3
         WHERE protocol_id = ?4 AND answered_at IS NULL",
        params![rating as i64, comment, now, protocol_id],
    )?;
    Ok(rows > 0)
}

/// Unanswered surveys sent at or after `since`, with the container mapping of
/// the protocol's instance.
pub fn get_unanswered_since(pool: &DbPool, since: &str) -> Result<Vec<PendingSurvey>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.protocol_id, p.instance_id, p.session_id, s.sent_at,
                i.container_host, i.container_name
         FROM satisfaction_surveys s
         INNER JOIN protocols p ON p.id = s.protocol_id
         INNER JOIN instances i ON i.id = p.instance_id
         WHERE s.answered_at IS NULL AND s.sent_at >= ?1
         ORDER BY s.sent_at ASC",
    )?;
    let rows = stmt.query_map(params![since], |row| {
        Ok(PendingSurvey {
            survey_id: row.get(0)?,
            protocol_id: row.get(1)?,
            instance_id: row.get(2)?,
            session_id: row.get(3)?,
            sent_at: row.get(4)?,
            container_host: row.get(5)?,
            container_name: row.get(6)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
