//! Yearly protocol number sequence.
//!
//! One singleton row holds `(year, last_number)`. Issuance is a single
//! upsert-with-RETURNING statement, so the read-modify-write is atomic in
//! SQLite and concurrent callers can never observe the same counter value.

use rusqlite::{params, Connection};

use crate::error::AppError;

const SEQUENCE_ID: &str = "protocol";

/// Issue the next protocol number for `year`.
///
/// First issuance creates the row; a stored year different from `year`
/// resets the counter to 1.
pub fn next_number(conn: &Connection, prefix: &str, year: i32) -> Result<String, AppError> {
    let counter: i64 = conn.query_row(
        "INSERT INTO protocol_sequence (id, year, last_number)
         VALUES (?1, ?2, 1)
         ON CONFLICT(id) DO UPDATE SET
             last_number = CASE
                 WHEN protocol_sequence.year = excluded.year THEN protocol_sequence.last_number + 1
                 ELSE 1
             END,
             year = excluded.year
         RETURNING last_number",
        params![SEQUENCE_ID, year],
        |row| row.get(0),
    )?;
    Ok(format_number(prefix, year, counter))
}

pub fn format_number(prefix: &str, year: i32, counter: i64) -> String {
    format!("{}-{}-{:06}", prefix, year, counter)
}
