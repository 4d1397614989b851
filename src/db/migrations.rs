use rusqlite::Connection;

use crate::error::AppError;

/// Run the consolidated, idempotent schema migration.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Instances (one AI runtime container per instance)
-- ============================================================================

CREATE TABLE IF NOT EXISTS instances (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    container_host  TEXT,
    container_name  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instance_channels (
    id           TEXT PRIMARY KEY,
    instance_id  TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
    channel      TEXT NOT NULL,
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ichan_instance ON instance_channels(instance_id, is_active);

-- ============================================================================
-- Protocols
-- ============================================================================

CREATE TABLE IF NOT EXISTS protocols (
    id                  TEXT PRIMARY KEY,
    number              TEXT NOT NULL UNIQUE,
    instance_id         TEXT NOT NULL REFERENCES instances(id),
    session_id          TEXT NOT NULL,
    contact_id          TEXT NOT NULL,
    contact_name        TEXT,
    channel             TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'ACTIVE'
                        CHECK(status IN ('ACTIVE', 'ESCALATED', 'IN_PROGRESS', 'CLOSED')),
    mode                TEXT NOT NULL DEFAULT 'AI_ONLY'
                        CHECK(mode IN ('AI_ONLY', 'HUMAN_ASSISTED', 'HUMAN_TAKEOVER')),
    escalation_reason   TEXT,
    escalated_at        TEXT,
    escalation_count    INTEGER NOT NULL DEFAULT 0,
    assigned_user_id    TEXT,
    assigned_at         TEXT,
    closed_by           TEXT,
    closed_at           TEXT,
    close_reason        TEXT,
    close_result        TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_protocols_session ON protocols(instance_id, session_id, status);
CREATE INDEX IF NOT EXISTS idx_protocols_contact ON protocols(instance_id, contact_id, closed_at);
CREATE INDEX IF NOT EXISTS idx_protocols_status  ON protocols(status);

-- ============================================================================
-- Protocol messages (append-only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS protocol_messages (
    id           TEXT PRIMARY KEY,
    protocol_id  TEXT NOT NULL REFERENCES protocols(id),
    user_id      TEXT,
    kind         TEXT NOT NULL CHECK(kind IN ('NOTE', 'DIRECT_MESSAGE', 'SYSTEM')),
    content      TEXT NOT NULL,
    metadata     TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pmsg_protocol ON protocol_messages(protocol_id, created_at);

-- ============================================================================
-- Protocol audit trail (append-only)
-- ============================================================================

CREATE TABLE IF NOT EXISTS protocol_audits (
    id           TEXT PRIMARY KEY,
    protocol_id  TEXT NOT NULL REFERENCES protocols(id),
    user_id      TEXT,
    action       TEXT NOT NULL,
    detail       TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_paudit_protocol ON protocol_audits(protocol_id, created_at);

-- ============================================================================
-- Satisfaction surveys (one per protocol)
-- ============================================================================

CREATE TABLE IF NOT EXISTS satisfaction_surveys (
    id           TEXT PRIMARY KEY,
    protocol_id  TEXT NOT NULL UNIQUE REFERENCES protocols(id),
    sent_by      TEXT,
    sent_at      TEXT NOT NULL,
    rating       INTEGER CHECK(rating IS NULL OR rating BETWEEN 1 AND 5),
    comment      TEXT,
    answered_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_survey_pending ON satisfaction_surveys(answered_at, sent_at);

-- ============================================================================
-- Learning packets (write-once)
-- ============================================================================

CREATE TABLE IF NOT EXISTS learning_packets (
    id                  TEXT PRIMARY KEY,
    protocol_id         TEXT NOT NULL UNIQUE REFERENCES protocols(id),
    instance_id         TEXT NOT NULL,
    escalation_reason   TEXT NOT NULL,
    ai_context          TEXT NOT NULL,
    human_response      TEXT NOT NULL,
    resolution          TEXT,
    tags                TEXT NOT NULL DEFAULT '[]',
    created_at          TEXT NOT NULL
);

-- ============================================================================
-- Protocol number sequence (singleton)
-- ============================================================================

CREATE TABLE IF NOT EXISTS protocol_sequence (
    id           TEXT PRIMARY KEY,
    year         INTEGER NOT NULL,
    last_number  INTEGER NOT NULL DEFAULT 0
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('instances', 'instance_channels', 'protocols', 'protocol_messages',
                              'protocol_audits', 'satisfaction_surveys', 'learning_packets',
                              'protocol_sequence')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 8);
    }
}
