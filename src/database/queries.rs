//! Typed SQL for audit entries and batches.
//!
//! Runtime-checked queries; timestamps are stored as Unix nanoseconds.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::audit::entry::AuditEntry;
use crate::database::models::{bound_nanos, from_nanos, to_nanos, AuditBatch};
use crate::error::{AnchorError, Result};

const ENTRY_COLUMNS: &str = "id, actor, action, resource_type, resource_id, timestamp_ns, \
                             previous_hash, hash, metadata";

const BATCH_COLUMNS: &str = "id, actor, root_hash, start_time_ns, end_time_ns, entry_count, \
                             created_at_ns, anchor_tx_hash, anchor_block_number, anchored_at_ns, \
                             anchor_status, anchor_error, anchor_attempts";

fn entry_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let metadata: String = row.try_get("metadata")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        actor: row.try_get("actor")?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        timestamp: from_nanos(row.try_get("timestamp_ns")?),
        previous_hash: row.try_get("previous_hash")?,
        hash: row.try_get("hash")?,
        metadata,
    })
}

fn batch_from_row(row: &SqliteRow) -> Result<AuditBatch> {
    let status: String = row.try_get("anchor_status")?;
    let block_number: Option<i64> = row.try_get("anchor_block_number")?;
    let anchored_at: Option<i64> = row.try_get("anchored_at_ns")?;

    Ok(AuditBatch {
        id: row.try_get("id")?,
        actor: row.try_get("actor")?,
        root_hash: row.try_get("root_hash")?,
        window_start: from_nanos(row.try_get("start_time_ns")?),
        window_end: from_nanos(row.try_get("end_time_ns")?),
        entry_count: row.try_get("entry_count")?,
        created_at: from_nanos(row.try_get("created_at_ns")?),
        anchor_status: status.parse()?,
        anchor_tx_hash: row.try_get("anchor_tx_hash")?,
        anchor_block_number: block_number.map(|n| n as u64),
        anchored_at: anchored_at.map(from_nanos),
        anchor_error: row.try_get("anchor_error")?,
        anchor_attempts: row.try_get("anchor_attempts")?,
    })
}

fn block_number_column(batch: &AuditBatch) -> Result<Option<i64>> {
    batch
        .anchor_block_number
        .map(|n| {
            i64::try_from(n).map_err(|_| {
                AnchorError::DatabaseError(format!("Block number {} out of range", n))
            })
        })
        .transpose()
}

// ── Entries ──

pub async fn insert_entry(pool: &SqlitePool, entry: &AuditEntry) -> Result<i64> {
    let timestamp_ns = to_nanos(entry.timestamp)?;
    let metadata = serde_json::to_string(&entry.metadata)?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_entries
            (actor, action, resource_type, resource_id, timestamp_ns, previous_hash, hash, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&entry.actor)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(timestamp_ns)
    .bind(&entry.previous_hash)
    .bind(&entry.hash)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn latest_entry_hash(pool: &SqlitePool, actor: &str) -> Result<Option<String>> {
    let hash = sqlx::query_scalar::<_, String>(
        "SELECT hash FROM audit_entries WHERE actor = $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(actor)
    .fetch_optional(pool)
    .await?;

    Ok(hash)
}

pub async fn entries_in_range(
    pool: &SqlitePool,
    actor: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<AuditEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_entries \
         WHERE actor = $1 \
           AND ($2 IS NULL OR timestamp_ns >= $2) \
           AND ($3 IS NULL OR timestamp_ns <= $3) \
         ORDER BY timestamp_ns ASC, id ASC",
        ENTRY_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(actor)
        .bind(start.map(bound_nanos))
        .bind(end.map(bound_nanos))
        .fetch_all(pool)
        .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Newest first.
pub async fn recent_entries(pool: &SqlitePool, actor: &str, limit: i64) -> Result<Vec<AuditEntry>> {
    let sql = format!(
        "SELECT {} FROM audit_entries WHERE actor = $1 ORDER BY id DESC LIMIT $2",
        ENTRY_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(actor)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn distinct_actors_with_entries(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<String>> {
    let actors = sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT actor FROM audit_entries
        WHERE timestamp_ns >= $1 AND timestamp_ns <= $2
        ORDER BY actor ASC
        LIMIT $3
        "#,
    )
    .bind(bound_nanos(start))
    .bind(bound_nanos(end))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(actors)
}

// ── Batches ──

pub async fn insert_batch(pool: &SqlitePool, batch: &AuditBatch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_batches
            (id, actor, root_hash, start_time_ns, end_time_ns, entry_count, created_at_ns,
             anchor_tx_hash, anchor_block_number, anchored_at_ns, anchor_status, anchor_error,
             anchor_attempts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&batch.id)
    .bind(&batch.actor)
    .bind(&batch.root_hash)
    .bind(to_nanos(batch.window_start)?)
    .bind(to_nanos(batch.window_end)?)
    .bind(batch.entry_count)
    .bind(to_nanos(batch.created_at)?)
    .bind(&batch.anchor_tx_hash)
    .bind(block_number_column(batch)?)
    .bind(batch.anchored_at.map(to_nanos).transpose()?)
    .bind(batch.anchor_status.as_str())
    .bind(&batch.anchor_error)
    .bind(batch.anchor_attempts)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the anchoring fields of an existing batch.
pub async fn update_batch_anchor(pool: &SqlitePool, batch: &AuditBatch) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE audit_batches
        SET anchor_tx_hash = $3,
            anchor_block_number = $4,
            anchored_at_ns = $5,
            anchor_status = $6,
            anchor_error = $7,
            anchor_attempts = $8
        WHERE id = $1 AND actor = $2
        "#,
    )
    .bind(&batch.id)
    .bind(&batch.actor)
    .bind(&batch.anchor_tx_hash)
    .bind(block_number_column(batch)?)
    .bind(batch.anchored_at.map(to_nanos).transpose()?)
    .bind(batch.anchor_status.as_str())
    .bind(&batch.anchor_error)
    .bind(batch.anchor_attempts)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AnchorError::DatabaseError(format!(
            "Batch {} not found for actor {}",
            batch.id, batch.actor
        )));
    }

    Ok(())
}

pub async fn batch_by_id_for_actor(
    pool: &SqlitePool,
    actor: &str,
    id: &str,
) -> Result<Option<AuditBatch>> {
    let sql = format!(
        "SELECT {} FROM audit_batches WHERE id = $1 AND actor = $2",
        BATCH_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(id)
        .bind(actor)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

pub async fn batch_by_actor_and_root(
    pool: &SqlitePool,
    actor: &str,
    root_hash: &str,
) -> Result<Option<AuditBatch>> {
    let sql = format!(
        "SELECT {} FROM audit_batches WHERE actor = $1 AND root_hash = $2",
        BATCH_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(actor)
        .bind(root_hash)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(batch_from_row).transpose()
}

/// Newest first.
pub async fn batches_by_actor(
    pool: &SqlitePool,
    actor: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditBatch>> {
    let sql = format!(
        "SELECT {} FROM audit_batches WHERE actor = $1 \
         ORDER BY created_at_ns DESC, id ASC LIMIT $2 OFFSET $3",
        BATCH_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(actor)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    rows.iter().map(batch_from_row).collect()
}
