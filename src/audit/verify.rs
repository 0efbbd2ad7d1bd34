//! Audit Log Verification
//!
//! Read-only integrity checks over hash-chained entries. A broken chain is
//! reported, never repaired.

use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::entry::AuditEntry;

/// Kind of integrity break found in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored hash does not match the entry's own fields.
    HashMismatch,
    /// `previous_hash` does not point at the next-older entry.
    LinkMismatch,
}

/// Verification result with detailed information
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub entry_count: usize,
    /// Index into the newest-first input slice.
    pub broken_at: Option<usize>,
    pub break_kind: Option<BreakKind>,
    pub error_message: Option<String>,
}

impl ChainVerification {
    fn valid(entry_count: usize) -> Self {
        Self {
            is_valid: true,
            entry_count,
            broken_at: None,
            break_kind: None,
            error_message: None,
        }
    }

    fn broken(entry_count: usize, index: usize, kind: BreakKind, message: String) -> Self {
        Self {
            is_valid: false,
            entry_count,
            broken_at: Some(index),
            break_kind: Some(kind),
            error_message: Some(message),
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("Audit chain is valid ({} entries)", self.entry_count)
        } else {
            format!(
                "Audit chain is invalid ({} entries): {}",
                self.entry_count,
                self.error_message.as_deref().unwrap_or("Unknown error")
            )
        }
    }
}

/// Verify a hash chain given newest→oldest, stopping at the first break.
pub fn verify_chain_detailed(entries: &[AuditEntry]) -> ChainVerification {
    let count = entries.len();

    for (i, entry) in entries.iter().enumerate() {
        let recomputed = entry.compute_hash();
        if recomputed != entry.hash {
            return ChainVerification::broken(
                count,
                i,
                BreakKind::HashMismatch,
                format!(
                    "Invalid hash in entry {} (id {}): stored {}, computed {}",
                    i, entry.id, entry.hash, recomputed
                ),
            );
        }

        if let Some(older) = entries.get(i + 1) {
            if entry.previous_hash != older.hash {
                return ChainVerification::broken(
                    count,
                    i,
                    BreakKind::LinkMismatch,
                    format!(
                        "Hash chain broken at entry {} (id {}): expected previous {}, got {}",
                        i, entry.id, older.hash, entry.previous_hash
                    ),
                );
            }
        }
    }

    ChainVerification::valid(count)
}

/// Verify a hash chain given newest→oldest.
///
/// Returns `false` on the first mismatch and logs the reason.
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    let result = verify_chain_detailed(entries);
    if result.is_valid {
        debug!(entries = result.entry_count, "Audit chain verified");
    } else {
        warn!(
            entries = result.entry_count,
            broken_at = ?result.broken_at,
            kind = ?result.break_kind,
            "{}",
            result.error_message.as_deref().unwrap_or("Audit chain verification failed")
        );
    }
    result.is_valid
}

/// Indices of entries whose stored hash no longer matches their fields.
pub fn find_tampered_entries(entries: &[AuditEntry]) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.verify_hash())
        .map(|(i, _)| i)
        .collect()
}
