use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub name: String,
    pub last_activity: i64,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Insert-if-absent. The primary key on `name` decides between two
/// concurrent registrations of the same name: one row lands, the other
/// caller sees the unique violation as `Conflict`.
pub async fn register(db_pool: &SqlitePool, name: &str) -> AppResult<()> {
    let result = sqlx::query("INSERT INTO participants (name,last_activity) VALUES (?,?)")
        .bind(name)
        .bind(now_millis())
        .execute(db_pool)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(AppError::Conflict),
        Err(err) => Err(err.into()),
    }
}

pub async fn heartbeat(db_pool: &SqlitePool, name: &str) -> AppResult<()> {
    let result = sqlx::query("UPDATE participants SET last_activity=? WHERE name=?")
        .bind(now_millis())
        .bind(name)
        .execute(db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(())
}

pub async fn list(db_pool: &SqlitePool) -> AppResult<Vec<Participant>> {
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT name,last_activity FROM participants")
        .fetch_all(db_pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(name, last_activity)| Participant {
            name,
            last_activity,
        })
        .collect())
}

pub async fn remove(db_pool: &SqlitePool, name: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM participants WHERE name=?")
        .bind(name)
        .execute(db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(())
}

/// Removal guarded by the timestamp the caller observed. A heartbeat
/// that lands in between bumps `last_activity` and voids the delete, so
/// a participant that just signalled never loses to the sweeper.
pub async fn remove_if_idle(db_pool: &SqlitePool, name: &str, observed: i64) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM participants WHERE name=? AND last_activity=?")
        .bind(name)
        .bind(observed)
        .execute(db_pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn is_active(db_pool: &SqlitePool, name: &str) -> AppResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM participants WHERE name=?")
        .bind(name)
        .fetch_optional(db_pool)
        .await?;

    Ok(row.is_some())
}
