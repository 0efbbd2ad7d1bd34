//! Audit Logger
//!
//! Appends entries to per-actor hash chains. Reading the actor's latest
//! hash, sealing the new entry and persisting it happen under one
//! per-actor lock, so two appends can never claim the same previous hash.
//! Appends for different actors do not contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::audit::entry::{AuditEntry, NewEntry, GENESIS_HASH};
use crate::audit::verify::{verify_chain_detailed, ChainVerification};
use crate::database::AuditStore;
use crate::error::{AnchorError, Result};

/// Audit logger managing per-actor append-only chains
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    append_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            append_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, actor: &str) -> Arc<Mutex<()>> {
        self.append_locks
            .entry(actor.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Link `entry` onto its actor's chain and persist it.
    pub async fn append(&self, entry: NewEntry) -> Result<AuditEntry> {
        if entry.actor.trim().is_empty() {
            return Err(AnchorError::MissingActor);
        }
        // Storage keeps i64 nanoseconds; anything wider would not reload
        // to the instant the hash covers.
        if entry.timestamp.timestamp_nanos_opt().is_none() {
            return Err(AnchorError::InvalidTimestamp(format!(
                "{} is outside the storable range",
                entry.timestamp.to_rfc3339()
            )));
        }

        let actor = entry.actor.clone();
        let lock = self.lock_for(&actor);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(entry).await
        };

        drop(lock);
        self.append_locks
            .remove_if(&actor, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn append_locked(&self, entry: NewEntry) -> Result<AuditEntry> {
        let previous_hash = self
            .store
            .latest_entry_hash(&entry.actor)
            .await?
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let sealed = entry.chain_after(previous_hash);
        let stored = self.store.append_entry(&sealed).await?;

        debug!(actor = %stored.actor, id = stored.id, "Appended audit entry: {}", stored.summary());
        Ok(stored)
    }

    /// Current head of the actor's chain, `GENESIS` if empty.
    pub async fn head_hash(&self, actor: &str) -> Result<String> {
        Ok(self
            .store
            .latest_entry_hash(actor)
            .await?
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    /// Verify the newest `limit` entries of an actor's chain.
    pub async fn verify_actor_chain(&self, actor: &str, limit: i64) -> Result<ChainVerification> {
        if actor.trim().is_empty() {
            return Err(AnchorError::MissingActor);
        }

        let entries = self.store.get_recent_entries(actor, limit).await?;
        let result = verify_chain_detailed(&entries);
        info!(actor = %actor, "{}", result.summary());
        Ok(result)
    }
}
