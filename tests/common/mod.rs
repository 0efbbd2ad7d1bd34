#![allow(dead_code)]

use async_trait::async_trait;
use audit_anchor::anchor::{AnchorReceipt, AnchoredEvent, ChainAnchorer};
use audit_anchor::audit::{AuditEntry, AuditLogger, NewEntry};
use audit_anchor::database::{AuditBatch, AuditStore, Database};
use audit_anchor::{AnchorError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// Hour-aligned instant used as the start of test windows.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap()
}

/// Append `count` entries for `actor`, one minute apart from `start`.
pub async fn seed_entries(
    logger: &AuditLogger,
    actor: &str,
    start: DateTime<Utc>,
    count: i64,
) -> Vec<AuditEntry> {
    let mut entries = Vec::new();
    for i in 0..count {
        let entry = logger
            .append(
                NewEntry::new(actor, "view", "patient_record", format!("rec-{}", i))
                    .at(start + Duration::minutes(i))
                    .with_metadata("channel", "api"),
            )
            .await
            .expect("Failed to append entry");
        entries.push(entry);
    }
    entries
}

pub fn hashes(entries: &[AuditEntry]) -> Vec<String> {
    entries.iter().map(|e| e.hash.clone()).collect()
}

/// Store wrapper counting batch writes.
pub struct CountingStore {
    inner: Database,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    /// 1-based `update_batch` call that fails; 0 disables.
    fail_update_on: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            fail_update_on: AtomicUsize::new(0),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Fail the `n`th `update_batch` call from now on.
    pub fn fail_nth_update(&self, n: usize) {
        self.fail_update_on
            .store(self.updates() + n, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.creates() + self.updates()
    }
}

#[async_trait]
impl AuditStore for CountingStore {
    async fn append_entry(&self, entry: &AuditEntry) -> Result<AuditEntry> {
        self.inner.append_entry(entry).await
    }

    async fn latest_entry_hash(&self, actor: &str) -> Result<Option<String>> {
        self.inner.latest_entry_hash(actor).await
    }

    async fn get_entries_in_range(
        &self,
        actor: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>> {
        self.inner.get_entries_in_range(actor, start, end).await
    }

    async fn get_recent_entries(&self, actor: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        self.inner.get_recent_entries(actor, limit).await
    }

    async fn create_batch(&self, batch: &AuditBatch) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_batch(batch).await
    }

    async fn update_batch(&self, batch: &AuditBatch) -> Result<()> {
        let call = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_update_on.load(Ordering::SeqCst) {
            return Err(AnchorError::DatabaseError("disk I/O error".to_string()));
        }
        self.inner.update_batch(batch).await
    }

    async fn get_batch_by_id_for_actor(
        &self,
        actor: &str,
        id: &str,
    ) -> Result<Option<AuditBatch>> {
        self.inner.get_batch_by_id_for_actor(actor, id).await
    }

    async fn get_batch_by_actor_and_root(
        &self,
        actor: &str,
        root_hash: &str,
    ) -> Result<Option<AuditBatch>> {
        self.inner.get_batch_by_actor_and_root(actor, root_hash).await
    }

    async fn list_batches_by_actor(
        &self,
        actor: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditBatch>> {
        self.inner.list_batches_by_actor(actor, limit, offset).await
    }

    async fn get_distinct_actors_with_entries(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        self.inner
            .get_distinct_actors_with_entries(start, end, limit)
            .await
    }
}

/// Scripted in-process ledger.
pub struct MockChain {
    pub anchor_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub find_calls: AtomicUsize,
    /// Returned by `verify_root`; `0` means not anchored.
    pub verify_timestamp: AtomicU64,
    failing_roots: Mutex<HashSet<String>>,
    fail_verify: Mutex<Option<String>>,
    event: Mutex<AnchoredEvent>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            anchor_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            verify_timestamp: AtomicU64::new(1_717_240_000),
            failing_roots: Mutex::new(HashSet::new()),
            fail_verify: Mutex::new(None),
            event: Mutex::new(AnchoredEvent {
                found: false,
                tx_hash: None,
                block_number: None,
            }),
        }
    }

    pub fn anchor_calls(&self) -> usize {
        self.anchor_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn fail_root(&self, root: &str) {
        self.failing_roots.lock().unwrap().insert(root.to_string());
    }

    pub fn heal_root(&self, root: &str) {
        self.failing_roots.lock().unwrap().remove(root);
    }

    pub fn fail_verify_with(&self, message: Option<&str>) {
        *self.fail_verify.lock().unwrap() = message.map(str::to_string);
    }

    pub fn set_verify_timestamp(&self, timestamp: u64) {
        self.verify_timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn set_event(&self, tx_hash: &str, block_number: u64) {
        *self.event.lock().unwrap() = AnchoredEvent {
            found: true,
            tx_hash: Some(tx_hash.to_string()),
            block_number: Some(block_number),
        };
    }
}

#[async_trait]
impl ChainAnchorer for MockChain {
    async fn anchor_root(&self, root: &str) -> Result<AnchorReceipt> {
        let call = self.anchor_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_roots.lock().unwrap().contains(root) {
            return Err(AnchorError::ChainError(
                "Post \"https://rpc.internal.example/v3/key123\": nonce too low".to_string(),
            ));
        }
        Ok(AnchorReceipt {
            tx_hash: format!("0x{:064x}", call),
            block_number: 19_000_000 + call as u64,
            gas_used: 48_000,
        })
    }

    async fn verify_root(&self, _root: &str) -> Result<u64> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_verify.lock().unwrap().clone() {
            return Err(AnchorError::ChainError(message));
        }
        Ok(self.verify_timestamp.load(Ordering::SeqCst))
    }

    async fn find_root_anchored_event(&self, _root: &str) -> Result<AnchoredEvent> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.event.lock().unwrap().clone())
    }
}
