use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use crate::{config::Config, log, registry, AppResult};

/// Runs the eviction loop until the process exits. The task only talks
/// to the registry and the log through their pool-backed operations, so
/// it can race request handlers freely.
pub fn spawn(db_pool: SqlitePool, config: Config) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval yields its first tick immediately; skip it so the
        // first sweep happens one full interval after startup
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match sweep_pass(&db_pool, config.idle_timeout).await {
                Ok(0) => {}
                Ok(evicted) => tracing::info!("evicted {evicted} idle participant(s)"),
                Err(err) => tracing::warn!("sweep pass failed: {err}"),
            }
        }
    })
}

/// One pass over the registry: snapshot, pick the entries idle past the
/// threshold, then for each one a timestamp-guarded removal followed by
/// a single departure notice. A heartbeat racing the pass wins (the
/// guarded delete misses); a store fault on one participant is logged
/// and the pass moves on to the next.
pub async fn sweep_pass(db_pool: &SqlitePool, idle_timeout: Duration) -> AppResult<usize> {
    let cutoff = registry::now_millis() - idle_timeout.as_millis() as i64;
    let snapshot = registry::list(db_pool).await?;

    let mut evicted = 0;
    for participant in snapshot {
        if participant.last_activity >= cutoff {
            continue;
        }

        match evict(db_pool, &participant).await {
            Ok(true) => evicted += 1,
            Ok(false) => {} // a heartbeat arrived since the snapshot
            Err(err) => tracing::warn!("failed to evict {}: {err}", participant.name),
        }
    }

    Ok(evicted)
}

async fn evict(db_pool: &SqlitePool, participant: &registry::Participant) -> AppResult<bool> {
    if !registry::remove_if_idle(db_pool, &participant.name, participant.last_activity).await? {
        return Ok(false);
    }

    log::append(
        db_pool,
        &participant.name,
        &log::Recipient::Broadcast,
        log::LEAVE_NOTICE,
        log::MessageKind::Status,
    )
    .await?;

    Ok(true)
}
