//! Batch building.
//!
//! Selects one actor's entries in a time window, orders them
//! deterministically, and records the Merkle root as an [`AuditBatch`].
//! Building the same window twice returns the batch created the first
//! time. This is the only place batches are created.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::entry::AuditEntry;
use crate::audit::merkle::{MerkleTree, Proof};
use crate::database::{AnchorStatus, AuditBatch, AuditStore};
use crate::error::{AnchorError, Result};

const MAX_PAGE_SIZE: i64 = 100;

/// Order by `(timestamp, id)` ascending.
pub fn sort_entries(entries: &mut [AuditEntry]) {
    entries.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
}

pub struct BatchManager {
    store: Arc<dyn AuditStore>,
}

impl BatchManager {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Load and sort the entries a batch over this window would cover.
    async fn window_entries(
        &self,
        actor: &str,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>> {
        let mut entries = self
            .store
            .get_entries_in_range(actor, window_start, window_end)
            .await?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Build (or find) the batch for `actor` over `[window_start, window_end]`.
    ///
    /// `None` leaves that side of the window unbounded.
    pub async fn build(
        &self,
        actor: &str,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
    ) -> Result<(AuditBatch, MerkleTree)> {
        if actor.trim().is_empty() {
            return Err(AnchorError::MissingActor);
        }

        let entries = self.window_entries(actor, window_start, window_end).await?;
        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(AnchorError::EmptyWindow(actor.to_string())),
        };

        let hashes: Vec<String> = entries.iter().map(|e| e.hash.clone()).collect();
        let tree = MerkleTree::build(&hashes)?;

        if let Some(existing) = self
            .store
            .get_batch_by_actor_and_root(actor, &tree.root)
            .await?
        {
            debug!(actor = %actor, batch_id = %existing.id, "Batch already exists for root");
            return Ok((existing, tree));
        }

        let batch = AuditBatch {
            id: Uuid::new_v4().to_string(),
            actor: actor.to_string(),
            root_hash: tree.root.clone(),
            window_start: window_start.unwrap_or(first),
            window_end: window_end.unwrap_or(last),
            entry_count: entries.len() as i64,
            created_at: Utc::now(),
            anchor_status: AnchorStatus::Pending,
            anchor_tx_hash: None,
            anchor_block_number: None,
            anchored_at: None,
            anchor_error: None,
            anchor_attempts: 0,
        };

        match self.store.create_batch(&batch).await {
            Ok(()) => {}
            Err(AnchorError::DuplicateBatch(_)) => {
                // Lost a race with a concurrent build of the same window.
                if let Some(existing) = self
                    .store
                    .get_batch_by_actor_and_root(actor, &tree.root)
                    .await?
                {
                    return Ok((existing, tree));
                }
                return Err(AnchorError::DatabaseError(format!(
                    "Batch for root {} vanished after conflict",
                    tree.root
                )));
            }
            Err(e) => return Err(e),
        }

        info!(
            actor = %actor,
            batch_id = %batch.id,
            entries = batch.entry_count,
            root = %batch.root_hash,
            "Created audit batch"
        );
        Ok((batch, tree))
    }

    /// Inclusion proof for `entry_hash` in a stored batch.
    ///
    /// Returns `None` if the batch does not exist for this actor.
    pub async fn prove_entry(
        &self,
        actor: &str,
        batch_id: &str,
        entry_hash: &str,
    ) -> Result<Option<(AuditBatch, Proof)>> {
        if actor.trim().is_empty() {
            return Err(AnchorError::MissingActor);
        }
        if batch_id.trim().is_empty() {
            return Err(AnchorError::MissingBatchId);
        }

        let batch = match self.store.get_batch_by_id_for_actor(actor, batch_id).await? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        let entries = self
            .window_entries(actor, Some(batch.window_start), Some(batch.window_end))
            .await?;
        let hashes: Vec<String> = entries.iter().map(|e| e.hash.clone()).collect();
        let tree = MerkleTree::build(&hashes)?;

        if tree.root != batch.root_hash {
            warn!(
                actor = %actor,
                batch_id = %batch_id,
                stored = %batch.root_hash,
                rebuilt = %tree.root,
                "Batch root no longer reproducible from stored entries"
            );
            return Err(AnchorError::RootMismatch {
                stored: batch.root_hash,
                rebuilt: tree.root,
            });
        }

        let proof = tree.generate_proof(entry_hash)?;
        Ok(Some((batch, proof)))
    }

    /// Newest batches first; `limit` is clamped to `1..=100`.
    pub async fn list_batches(
        &self,
        actor: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditBatch>> {
        if actor.trim().is_empty() {
            return Err(AnchorError::MissingActor);
        }
        self.store
            .list_batches_by_actor(actor, limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
            .await
    }
}
