use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{LearningPacket, NewLearningPacket};
use crate::error::AppError;

fn parse_tags(raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_packet(row: &Row) -> rusqlite::Result<LearningPacket> {
    let tags: String = row.get("tags")?;
    Ok(LearningPacket {
        id: row.get("id")?,
        protocol_id: row.get("protocol_id")?,
        instance_id: row.get("instance_id")?,
        escalation_reason: row.get("escalation_reason")?,
        ai_context: row.get("ai_context")?,
        human_response: row.get("human_response")?,
        resolution: row.get("resolution")?,
        tags: parse_tags(&tags)?,
        created_at: row.get("created_at")?,
    })
}

/// Write-once: a second packet for the same protocol violates the UNIQUE
/// constraint and surfaces as a database error.
pub fn insert(conn: &Connection, input: NewLearningPacket) -> Result<LearningPacket, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now_ts();
    let tags = serde_json::to_string(&input.tags)?;
    conn.execute(
        "INSERT INTO learning_packets
         (id, protocol_id, instance_id, escalation_reason, ai_context, human_response,
          resolution, tags, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            input.protocol_id,
            input.instance_id,
            input.escalation_reason,
            input.ai_context,
            input.human_response,
            input.resolution,
            tags,
            now,
        ],
    )?;
    Ok(LearningPacket {
        id,
        protocol_id: input.protocol_id,
        instance_id: input.instance_id,
        escalation_reason: input.escalation_reason,
        ai_context: input.ai_context,
        human_response: input.human_response,
        resolution: input.resolution,
        tags: input.tags,
        created_at: now,
    })
}

pub fn get_by_protocol(conn: &Connection, protocol_id: &str) -> Result<Option<LearningPacket>, AppError> {
    conn.query_row(
        "SELECT * FROM learning_packets WHERE protocol_id = ?1",
        params![protocol_id],
        row_to_packet,
    )
    .optional()
    .map_err(AppError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(r#"["refund","vip"]"#).unwrap(), vec!["refund", "vip"]);
        assert!(parse_tags("[]").unwrap().is_empty());
        assert!(matches!(
            parse_tags("refund,vip"),
            Err(rusqlite::Error::FromSqlConversionFailure(..))
        ));
    }
}
