//! Anchor state machine.
//!
//! ```text
//! pending ──▶ anchored   (terminal; re-anchoring is a no-op)
//!    │  ▲
//!    ▼  │ retry
//!  failed
//! ```
//!
//! Every transition is persisted before the next chain call so observers
//! see the attempt in progress. Chain errors are stored on the batch in
//! sanitized, truncated form and returned to the caller.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};

use crate::anchor::{AnchorReceipt, ChainAnchorer};
use crate::database::{AnchorStatus, AuditBatch, AuditStore};
use crate::error::{AnchorError, Result};

/// Upper bound on stored error messages, in characters.
pub const MAX_ERROR_LEN: usize = 500;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:https?|wss?)://[^\s"'<>]+"#).expect("valid URL pattern")
});
static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]{40}\b").expect("valid address pattern"));
static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b").expect("valid host pattern")
});
static CREDENTIAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bearer|api[_-]?key|token|secret|password)([=:\s]+)\S+")
        .expect("valid credential pattern")
});
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Strip endpoints, addresses and credentials from a chain error and
/// bound its length.
pub fn sanitize_error(message: &str) -> String {
    let cleaned = URL_PATTERN.replace_all(message, "[redacted-url]");
    let cleaned = CREDENTIAL_PATTERN.replace_all(&cleaned, "$1$2[redacted]");
    let cleaned = ADDRESS_PATTERN.replace_all(&cleaned, "[redacted-address]");
    let cleaned = HOST_PATTERN.replace_all(&cleaned, "[redacted-host]");
    let cleaned = WHITESPACE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return "anchoring failed".to_string();
    }
    if cleaned.chars().count() <= MAX_ERROR_LEN {
        return cleaned.to_string();
    }

    let mut truncated: String = cleaned.chars().take(MAX_ERROR_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

pub struct AnchorStateMachine {
    store: Arc<dyn AuditStore>,
    chain: Option<Arc<dyn ChainAnchorer>>,
}

impl AnchorStateMachine {
    /// `chain` is `None` when no anchoring ledger is configured; every
    /// anchor attempt then fails before touching storage.
    pub fn new(store: Arc<dyn AuditStore>, chain: Option<Arc<dyn ChainAnchorer>>) -> Self {
        Self { store, chain }
    }

    /// Drive the batch toward `anchored`.
    ///
    /// Returns `Ok(None)` if no such batch exists for `actor`.
    pub async fn anchor(&self, actor: &str, batch_id: &str) -> Result<Option<AuditBatch>> {
        let chain = self.chain.as_ref().ok_or(AnchorError::ChainUnavailable)?;
        if actor.trim().is_empty() {
            return Err(AnchorError::MissingActor);
        }
        if batch_id.trim().is_empty() {
            return Err(AnchorError::MissingBatchId);
        }

        let mut batch = match self.store.get_batch_by_id_for_actor(actor, batch_id).await? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        if batch.is_anchored() {
            debug!(actor = %actor, batch_id = %batch_id, "Batch already anchored");
            return Ok(Some(batch));
        }

        // Any earlier run may have reached the chain before it was cut
        // short, whatever state it left behind.
        let previously_attempted = batch.anchor_attempts > 0
            || batch.anchor_status == AnchorStatus::Failed
            || batch.anchor_tx_hash.is_some();

        batch.anchor_status = AnchorStatus::Pending;
        batch.anchor_error = None;
        batch.anchor_attempts += 1;
        self.store.update_batch(&batch).await?;

        let existing = self
            .existing_anchor(chain.as_ref(), &batch, previously_attempted)
            .await;
        let receipt = match existing {
            Some(receipt) => receipt,
            None => match chain.anchor_root(&batch.root_hash).await {
                Ok(receipt) => receipt,
                Err(e) => return Err(self.fail_chain(&mut batch, &e).await),
            },
        };

        info!(
            actor = %actor,
            batch_id = %batch.id,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "Anchor transaction recorded"
        );
        batch.anchor_tx_hash = Some(receipt.tx_hash);
        batch.anchor_block_number = Some(receipt.block_number);
        if let Err(e) = self.store.update_batch(&batch).await {
            self.fail(&mut batch, &e.to_string()).await;
            return Err(e);
        }

        let timestamp = match chain.verify_root(&batch.root_hash).await {
            Ok(timestamp) => timestamp,
            Err(e) => return Err(self.fail_chain(&mut batch, &e).await),
        };

        let anchored_at = match confirmed_at(timestamp) {
            Some(anchored_at) => anchored_at,
            None => {
                self.fail(&mut batch, "root not confirmed on chain").await;
                return Err(AnchorError::RootNotConfirmed(batch.root_hash));
            }
        };

        batch.anchored_at = Some(anchored_at);
        batch.anchor_status = AnchorStatus::Anchored;
        batch.anchor_error = None;
        if let Err(e) = self.store.update_batch(&batch).await {
            batch.anchored_at = None;
            self.fail(&mut batch, &e.to_string()).await;
            return Err(e);
        }

        info!(
            actor = %actor,
            batch_id = %batch.id,
            anchored_at = %anchored_at,
            "Batch anchored"
        );
        Ok(Some(batch))
    }

    /// Receipt for a root the chain already holds, when worth checking.
    async fn existing_anchor(
        &self,
        chain: &dyn ChainAnchorer,
        batch: &AuditBatch,
        previously_attempted: bool,
    ) -> Option<AnchorReceipt> {
        if !previously_attempted {
            return None;
        }

        match chain.find_root_anchored_event(&batch.root_hash).await {
            Ok(event) if event.found => match (event.tx_hash, event.block_number) {
                (Some(tx_hash), Some(block_number)) => {
                    info!(
                        batch_id = %batch.id,
                        tx_hash = %tx_hash,
                        "Root already anchored on chain, skipping resubmission"
                    );
                    Some(AnchorReceipt {
                        tx_hash,
                        block_number,
                        gas_used: 0,
                    })
                }
                _ => {
                    warn!(batch_id = %batch.id, "Anchored event is missing tx details");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                warn!(
                    batch_id = %batch.id,
                    error = %sanitize_error(&e.to_string()),
                    "Anchored event lookup failed, resubmitting"
                );
                None
            }
        }
    }

    /// Fail the batch for a chain error and build the error to return.
    async fn fail_chain(&self, batch: &mut AuditBatch, err: &AnchorError) -> AnchorError {
        AnchorError::ChainError(self.fail(batch, &chain_detail(err)).await)
    }

    /// Mark the batch failed and persist it. Returns the stored message.
    async fn fail(&self, batch: &mut AuditBatch, reason: &str) -> String {
        let message = sanitize_error(reason);
        batch.anchor_status = AnchorStatus::Failed;
        batch.anchor_error = Some(message.clone());

        warn!(
            actor = %batch.actor,
            batch_id = %batch.id,
            error = %message,
            "Anchoring failed"
        );

        if let Err(e) = self.store.update_batch(batch).await {
            error!(batch_id = %batch.id, error = %e, "Failed to record anchoring failure");
        }
        message
    }
}

/// Error text without the `Chain error: ` prefix a chain client adds.
fn chain_detail(err: &AnchorError) -> String {
    match err {
        AnchorError::ChainError(message) => message.clone(),
        other => other.to_string(),
    }
}

/// `0` means the ledger has no record of the root.
fn confirmed_at(timestamp: u64) -> Option<DateTime<Utc>> {
    if timestamp == 0 {
        return None;
    }
    let seconds = i64::try_from(timestamp).ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}
