//! Persistence for audit entries and batches.
//!
//! [`AuditStore`] is the seam the anchoring components depend on;
//! [`Database`] implements it over a SQLite pool.

pub mod models;
pub mod queries;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use crate::audit::entry::AuditEntry;
use crate::error::Result;
pub use models::{AnchorStatus, AuditBatch};

/// Storage operations consumed by the hash chain, batching and anchoring.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a sealed entry and return it with its assigned id.
    async fn append_entry(&self, entry: &AuditEntry) -> Result<AuditEntry>;

    /// Hash of the actor's most recently appended entry.
    async fn latest_entry_hash(&self, actor: &str) -> Result<Option<String>>;

    /// Entries in `[start, end]`, `None` meaning unbounded on that side.
    async fn get_entries_in_range(
        &self,
        actor: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>>;

    /// Most recent entries, newest first.
    async fn get_recent_entries(&self, actor: &str, limit: i64) -> Result<Vec<AuditEntry>>;

    async fn create_batch(&self, batch: &AuditBatch) -> Result<()>;

    async fn update_batch(&self, batch: &AuditBatch) -> Result<()>;

    async fn get_batch_by_id_for_actor(&self, actor: &str, id: &str)
        -> Result<Option<AuditBatch>>;

    async fn get_batch_by_actor_and_root(
        &self,
        actor: &str,
        root_hash: &str,
    ) -> Result<Option<AuditBatch>>;

    async fn list_batches_by_actor(
        &self,
        actor: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditBatch>>;

    async fn get_distinct_actors_with_entries(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect (creating the file if needed) and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let database = Database { pool };
        database.run_migrations().await?;
        info!("Connected to {}", database_url);
        Ok(database)
    }

    /// Private in-memory database, primarily for tests.
    pub async fn new_in_memory() -> Result<Self> {
        // One connection that never recycles: each connection would
        // otherwise see its own empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let database = Database { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AuditStore for Database {
    async fn append_entry(&self, entry: &AuditEntry) -> Result<AuditEntry> {
        let id = queries::insert_entry(&self.pool, entry).await?;
        Ok(AuditEntry {
            id,
            ..entry.clone()
        })
    }

    async fn latest_entry_hash(&self, actor: &str) -> Result<Option<String>> {
        queries::latest_entry_hash(&self.pool, actor).await
    }

    async fn get_entries_in_range(
        &self,
        actor: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>> {
        queries::entries_in_range(&self.pool, actor, start, end).await
    }

    async fn get_recent_entries(&self, actor: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        queries::recent_entries(&self.pool, actor, limit).await
    }

    async fn create_batch(&self, batch: &AuditBatch) -> Result<()> {
        queries::insert_batch(&self.pool, batch).await
    }

    async fn update_batch(&self, batch: &AuditBatch) -> Result<()> {
        queries::update_batch_anchor(&self.pool, batch).await
    }

    async fn get_batch_by_id_for_actor(
        &self,
        actor: &str,
        id: &str,
    ) -> Result<Option<AuditBatch>> {
        queries::batch_by_id_for_actor(&self.pool, actor, id).await
    }

    async fn get_batch_by_actor_and_root(
        &self,
        actor: &str,
        root_hash: &str,
    ) -> Result<Option<AuditBatch>> {
        queries::batch_by_actor_and_root(&self.pool, actor, root_hash).await
    }

    async fn list_batches_by_actor(
        &self,
        actor: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditBatch>> {
        queries::batches_by_actor(&self.pool, actor, limit, offset).await
    }

    async fn get_distinct_actors_with_entries(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        queries::distinct_actors_with_entries(&self.pool, start, end, limit).await
    }
}
