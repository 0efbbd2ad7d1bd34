//! Audit Log System
//!
//! Tamper-evident logging of actions against user records, with
//! per-actor hash chains and Merkle trees for anchoring.

pub mod entry;
pub mod logger;
pub mod merkle;
pub mod verify;

pub use entry::{AuditEntry, NewEntry, GENESIS_HASH};
pub use logger::AuditLogger;
pub use merkle::{build_merkle_tree, merkle_root, verify_proof, MerkleTree, Proof, ProofStep};
pub use verify::{verify_chain, verify_chain_detailed, ChainVerification};
