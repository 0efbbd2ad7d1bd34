//! Audit Log Entry
//!
//! Defines the structure for tamper-evident audit log entries
//! with cryptographic hash chains.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// `previous_hash` of the first entry in an actor's chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// Audit log entry with cryptographic hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
    pub metadata: BTreeMap<String, String>,
}

/// An entry before it has been linked into a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Fields covered by the entry hash, in serialization order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    actor: &'a str,
    action: &'a str,
    resource_type: &'a str,
    resource_id: &'a str,
    timestamp: String,
    previous_hash: &'a str,
}

impl NewEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Link this entry after `previous_hash` and seal it.
    ///
    /// The returned entry has `id == 0` until the store assigns one.
    pub fn chain_after(self, previous_hash: impl Into<String>) -> AuditEntry {
        let mut entry = AuditEntry {
            id: 0,
            actor: self.actor,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            timestamp: self.timestamp,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            metadata: self.metadata,
        };
        entry.hash = entry.compute_hash();
        entry
    }
}

impl AuditEntry {
    /// Canonical JSON projection that the hash commits to.
    ///
    /// Metadata is not part of the projection.
    pub fn canonical_string(&self) -> String {
        let fields = HashedFields {
            actor: &self.actor,
            action: &self.action,
            resource_type: &self.resource_type,
            resource_id: &self.resource_id,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            previous_hash: &self.previous_hash,
        };
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(&fields).unwrap_or_default()
    }

    /// SHA256 of the canonical projection, lowercase hex.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify this entry's stored hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} {} {}/{} ({})",
            self.actor, self.action, self.resource_type, self.resource_id, self.hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_entry() -> AuditEntry {
        NewEntry::new("0xalice", "record.read", "patient", "p-1")
            .at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
            .chain_after(GENESIS_HASH)
    }

    #[test]
    fn test_entry_creation() {
        let entry = fixed_entry();
        assert_eq!(entry.actor, "0xalice");
        assert!(entry.is_genesis());
        assert!(entry.verify_hash());
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn test_canonical_string_layout() {
        let entry = fixed_entry();
        assert_eq!(
            entry.canonical_string(),
            r#"{"actor":"0xalice","action":"record.read","resourceType":"patient","resourceId":"p-1","timestamp":"2024-03-01T12:00:00.000000000Z","previousHash":"GENESIS"}"#
        );
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = fixed_entry();
        let b = fixed_entry();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.compute_hash(), a.compute_hash());
    }

    #[test]
    fn test_metadata_not_hashed() {
        let plain = fixed_entry();
        let tagged = NewEntry::new("0xalice", "record.read", "patient", "p-1")
            .at(plain.timestamp)
            .with_metadata("ip", "10.0.0.1")
            .chain_after(GENESIS_HASH);
        assert_eq!(plain.hash, tagged.hash);
    }

    #[test]
    fn test_field_tamper_detected() {
        let mut entry = fixed_entry();
        entry.resource_id = "p-2".to_string();
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_nanosecond_precision_is_hashed() {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let a = NewEntry::new("a", "x", "t", "1").at(base).chain_after(GENESIS_HASH);
        let b = NewEntry::new("a", "x", "t", "1")
            .at(base + chrono::Duration::nanoseconds(1))
            .chain_after(GENESIS_HASH);
        assert_ne!(a.hash, b.hash);
    }
}
