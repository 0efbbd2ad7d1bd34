//! Blockchain anchoring of audit batch roots.
//!
//! Batches are built per actor and window ([`batch`]), committed to an
//! external ledger through a [`ChainAnchorer`] ([`state`]), and swept
//! periodically ([`scheduler`]).
//!
//! ```text
//! AnchorScheduler ──▶ BatchManager::build ──▶ AnchorStateMachine::anchor ──▶ ChainAnchorer
//! ```

pub mod batch;
pub mod client;
pub mod scheduler;
pub mod state;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use batch::BatchManager;
pub use client::GatewayChainAnchorer;
pub use scheduler::{run_periodic, ActorOutcome, AnchorScheduler, PeriodicTask, SweepReport};
pub use state::{sanitize_error, AnchorStateMachine};

/// Receipt for a submitted anchor transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Result of searching the ledger for a root's anchoring event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchoredEvent {
    pub found: bool,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// Narrow interface to the external anchoring ledger.
///
/// Roots are passed as lowercase hex without a `0x` prefix.
#[async_trait]
pub trait ChainAnchorer: Send + Sync {
    /// Submit `root` and wait for the transaction to be mined.
    async fn anchor_root(&self, root: &str) -> Result<AnchorReceipt>;

    /// Unix timestamp at which `root` was anchored; `0` if not anchored.
    async fn verify_root(&self, root: &str) -> Result<u64>;

    /// Locate the event emitted when `root` was anchored, if any.
    async fn find_root_anchored_event(&self, root: &str) -> Result<AnchoredEvent>;
}
