use rusqlite::{params, Row};

use crate::db::models::{CreateInstanceInput, Instance};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_instance(row: &Row) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: row.get("id")?,
        name: row.get("name")?,
        container_host: row.get("container_host")?,
        container_name: row.get("container_name")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create(pool: &DbPool, input: CreateInstanceInput) -> Result<Instance, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now_ts();

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO instances (id, name, container_host, container_name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, input.name, input.container_host, input.container_name, now],
    )?;
    drop(conn);

    get_by_id(pool, &id)
}

/// Attach a messaging channel to an instance.
pub fn add_channel(
    pool: &DbPool,
    instance_id: &str,
    channel: &str,
    is_active: bool,
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO instance_channels (id, instance_id, channel, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, instance_id, channel, is_active as i32, crate::db::now_ts()],
    )?;
    Ok(id)
}

pub fn set_channel_active(pool: &DbPool, channel_id: &str, is_active: bool) -> Result<(), AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE instance_channels SET is_active = ?1 WHERE id = ?2",
        params![is_active as i32, channel_id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(format!("Channel {channel_id}")));
    }
    Ok(())
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<Instance, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM instances WHERE id = ?1",
        params![id],
        row_to_instance,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Instance {id}")),
        other => AppError::Database(other),
    })
}

/// Instances the session poller may visit: container mapped and at least one
/// active channel.
pub fn get_pollable(pool: &DbPool) -> Result<Vec<Instance>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT i.* FROM instances i
         WHERE COALESCE(i.container_host, '') != ''
           AND COALESCE(i.container_name, '') != ''
           AND EXISTS (
               SELECT 1 FROM instance_channels c
               WHERE c.instance_id = i.id AND c.is_active = 1
           )
         ORDER BY i.created_at",
    )?;
    let rows = stmt.query_map([], row_to_instance)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
