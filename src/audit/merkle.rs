//! Merkle Tree for Audit Batches
//!
//! Binary SHA256 Merkle tree over hex-encoded entry hashes. Internal nodes
//! hash the raw bytes of their children (`SHA256(left || right)`); a level
//! with an odd number of nodes pairs its last node with itself.
//!
//! The tree is order-sensitive. Callers sort leaves deterministically
//! before building.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AnchorError, Result};

/// Merkle tree with every level retained for proof generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    pub leaves: Vec<String>,
    /// `levels[0] == leaves`, `levels[last] == [root]`.
    pub levels: Vec<Vec<String>>,
    pub root: String,
}

/// One sibling on the path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofStep {
    pub hash: String,
    /// Sibling sits to the left of the running hash.
    pub is_left: bool,
}

/// Merkle inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub entry_hash: String,
    pub steps: Vec<ProofStep>,
}

impl Proof {
    pub fn size(&self) -> usize {
        self.steps.len()
    }
}

fn decode_leaf(hash: &str) -> Result<Vec<u8>> {
    if hash.is_empty() {
        return Err(AnchorError::InvalidHash("empty hash".to_string()));
    }
    hex::decode(hash).map_err(|e| AnchorError::InvalidHash(format!("{}: {}", hash, e)))
}

fn hash_bytes(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// `hex(SHA256(decode(left) || decode(right)))`.
pub fn hash_pair(left: &str, right: &str) -> Result<String> {
    let left = decode_leaf(left)?;
    let right = decode_leaf(right)?;
    Ok(hex::encode(hash_bytes(&left, &right)))
}

impl MerkleTree {
    /// Build a tree bottom-up from leaf hashes.
    pub fn build(hashes: &[String]) -> Result<Self> {
        if hashes.is_empty() {
            return Err(AnchorError::EmptyLeaves);
        }

        let mut current: Vec<Vec<u8>> = hashes
            .iter()
            .map(|h| decode_leaf(h))
            .collect::<Result<_>>()?;

        let mut levels = vec![hashes.to_vec()];

        while current.len() > 1 {
            let next: Vec<Vec<u8>> = current
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    hash_bytes(left, right)
                })
                .collect();

            levels.push(next.iter().map(hex::encode).collect());
            current = next;
        }

        // A single leaf is its own root and keeps the caller's spelling.
        let root = match levels.last().and_then(|level| level.first()) {
            Some(root) => root.clone(),
            None => return Err(AnchorError::EmptyLeaves),
        };

        debug!(
            leaves = hashes.len(),
            levels = levels.len(),
            root = %root,
            "Built Merkle tree"
        );

        Ok(Self {
            leaves: hashes.to_vec(),
            levels,
            root,
        })
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Generate an inclusion proof for the first leaf equal to `leaf_hash`.
    pub fn generate_proof(&self, leaf_hash: &str) -> Result<Proof> {
        let mut index = self
            .leaves
            .iter()
            .position(|leaf| leaf == leaf_hash)
            .ok_or_else(|| AnchorError::LeafNotFound(leaf_hash.to_string()))?;

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));

        for level in &self.levels[..self.levels.len() - 1] {
            let is_left = index % 2 == 1;
            let sibling_index = if is_left { index - 1 } else { index + 1 };
            // Padding: the last node of an odd level pairs with itself.
            let sibling = level.get(sibling_index).unwrap_or(&level[index]);

            steps.push(ProofStep {
                hash: sibling.clone(),
                is_left,
            });
            index /= 2;
        }

        Ok(Proof {
            entry_hash: leaf_hash.to_string(),
            steps,
        })
    }
}

/// Build a tree. Equivalent to [`MerkleTree::build`].
pub fn build_merkle_tree(hashes: &[String]) -> Result<MerkleTree> {
    MerkleTree::build(hashes)
}

/// Root of the tree over `hashes`, identical to `build_merkle_tree(hashes)?.root`.
pub fn merkle_root(hashes: &[String]) -> Result<String> {
    Ok(MerkleTree::build(hashes)?.root)
}

/// Replay `proof` from `leaf_hash` and compare against `root`.
///
/// Accepts untrusted input: malformed hex anywhere yields `false`.
pub fn verify_proof(root: &str, leaf_hash: &str, proof: &Proof) -> bool {
    let mut current = match decode_leaf(leaf_hash) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    if proof.steps.is_empty() {
        return leaf_hash == root;
    }

    for step in &proof.steps {
        let sibling = match decode_leaf(&step.hash) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        current = if step.is_left {
            hash_bytes(&sibling, &current)
        } else {
            hash_bytes(&current, &sibling)
        };
    }

    hex::encode(current) == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repeated(pair: &str) -> String {
        pair.repeat(32)
    }

    fn four_leaves() -> Vec<String> {
        ["aa", "bb", "cc", "dd"].iter().map(|p| repeated(p)).collect()
    }

    fn numbered_leaves(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| hex::encode(Sha256::digest(format!("leaf-{}", i).as_bytes())))
            .collect()
    }

    /// Flip one hex digit to a different hex digit.
    fn flip_char(s: &str, index: usize) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        chars[index] = if chars[index] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_four_leaf_shape() {
        let tree = MerkleTree::build(&four_leaves()).unwrap();
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.levels[0].len(), 4);
        assert_eq!(tree.levels[1].len(), 2);
        assert_eq!(tree.levels[2].len(), 1);
        assert_eq!(tree.root.len(), 64);
        assert!(tree.root.chars().all(|c| c.is_ascii_hexdigit()));

        let proof = tree.generate_proof(&repeated("cc")).unwrap();
        assert_eq!(proof.size(), 2);
    }

    #[test]
    fn test_four_leaf_root_matches_manual_hashing() {
        let leaves = four_leaves();
        let ab = hash_pair(&leaves[0], &leaves[1]).unwrap();
        let cd = hash_pair(&leaves[2], &leaves[3]).unwrap();
        let expected = hash_pair(&ab, &cd).unwrap();
        assert_eq!(merkle_root(&leaves).unwrap(), expected);
    }

    #[test]
    fn test_pair_hash_uses_raw_bytes() {
        let left = repeated("aa");
        let right = repeated("bb");
        let mut raw = vec![0xaa_u8; 32];
        raw.extend(vec![0xbb_u8; 32]);
        let expected = hex::encode(Sha256::digest(&raw));
        assert_eq!(hash_pair(&left, &right).unwrap(), expected);
    }

    #[test]
    fn test_odd_level_duplicates_last_node() {
        let leaves = numbered_leaves(3);
        let tree = MerkleTree::build(&leaves).unwrap();
        let ab = hash_pair(&leaves[0], &leaves[1]).unwrap();
        let cc = hash_pair(&leaves[2], &leaves[2]).unwrap();
        assert_eq!(tree.levels[1], vec![ab.clone(), cc.clone()]);
        assert_eq!(tree.root, hash_pair(&ab, &cc).unwrap());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaves = numbered_leaves(1);
        let tree = MerkleTree::build(&leaves).unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.root, leaves[0]);

        let proof = tree.generate_proof(&leaves[0]).unwrap();
        assert!(proof.steps.is_empty());
        assert!(verify_proof(&tree.root, &leaves[0], &proof));
    }

    #[test]
    fn test_empty_leaves_rejected() {
        assert!(matches!(MerkleTree::build(&[]), Err(AnchorError::EmptyLeaves)));
        assert!(matches!(merkle_root(&[]), Err(AnchorError::EmptyLeaves)));
    }

    #[test]
    fn test_invalid_hex_rejected() {
        let mut leaves = four_leaves();
        leaves[1] = "not-hex".to_string();
        assert!(matches!(
            MerkleTree::build(&leaves),
            Err(AnchorError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_build_and_root_agree() {
        for count in 1..=17 {
            let leaves = numbered_leaves(count);
            let tree = build_merkle_tree(&leaves).unwrap();
            assert_eq!(tree.root, merkle_root(&leaves).unwrap(), "count {}", count);
        }
    }

    #[test]
    fn test_deterministic_root() {
        let leaves = numbered_leaves(9);
        let first = MerkleTree::build(&leaves).unwrap();
        let second = MerkleTree::build(&leaves).unwrap();
        assert_eq!(first.root, second.root);
    }

    #[test]
    fn test_order_sensitive() {
        let mut leaves = numbered_leaves(4);
        let original = merkle_root(&leaves).unwrap();
        leaves.swap(0, 3);
        assert_ne!(original, merkle_root(&leaves).unwrap());
    }

    #[test]
    fn test_every_leaf_proof_verifies() {
        for count in [1, 2, 3, 5, 7, 8, 13] {
            let leaves = numbered_leaves(count);
            let tree = MerkleTree::build(&leaves).unwrap();
            for leaf in &leaves {
                let proof = tree.generate_proof(leaf).unwrap();
                assert!(
                    verify_proof(&tree.root, leaf, &proof),
                    "proof failed for {} in {} leaves",
                    leaf,
                    count
                );
            }
        }
    }

    #[test]
    fn test_padding_step_is_self() {
        let leaves = numbered_leaves(3);
        let tree = MerkleTree::build(&leaves).unwrap();
        let proof = tree.generate_proof(&leaves[2]).unwrap();
        assert_eq!(proof.steps[0].hash, leaves[2]);
        assert!(!proof.steps[0].is_left);
        assert!(proof.steps[1].is_left);
    }

    #[test]
    fn test_leaf_not_found() {
        let tree = MerkleTree::build(&four_leaves()).unwrap();
        assert!(matches!(
            tree.generate_proof(&repeated("ee")),
            Err(AnchorError::LeafNotFound(_))
        ));
    }

    #[test]
    fn test_tampered_root_fails() {
        let tree = MerkleTree::build(&numbered_leaves(6)).unwrap();
        let leaf = &tree.leaves[4];
        let proof = tree.generate_proof(leaf).unwrap();
        for i in [0, 31, 63] {
            assert!(!verify_proof(&flip_char(&tree.root, i), leaf, &proof));
        }
    }

    #[test]
    fn test_tampered_leaf_fails() {
        let tree = MerkleTree::build(&numbered_leaves(6)).unwrap();
        let leaf = tree.leaves[1].clone();
        let proof = tree.generate_proof(&leaf).unwrap();
        assert!(!verify_proof(&tree.root, &flip_char(&leaf, 10), &proof));
    }

    #[test]
    fn test_tampered_step_fails() {
        let tree = MerkleTree::build(&numbered_leaves(8)).unwrap();
        let leaf = tree.leaves[5].clone();
        let proof = tree.generate_proof(&leaf).unwrap();
        for step in 0..proof.steps.len() {
            let mut tampered = proof.clone();
            tampered.steps[step].hash = flip_char(&tampered.steps[step].hash, 7);
            assert!(!verify_proof(&tree.root, &leaf, &tampered), "step {}", step);
        }
    }

    #[test]
    fn test_flipped_direction_fails() {
        let tree = MerkleTree::build(&numbered_leaves(4)).unwrap();
        let leaf = tree.leaves[0].clone();
        let mut proof = tree.generate_proof(&leaf).unwrap();
        proof.steps[0].is_left = !proof.steps[0].is_left;
        assert!(!verify_proof(&tree.root, &leaf, &proof));
    }

    #[test]
    fn test_malformed_proof_returns_false() {
        let tree = MerkleTree::build(&numbered_leaves(4)).unwrap();
        let leaf = tree.leaves[0].clone();
        let mut proof = tree.generate_proof(&leaf).unwrap();
        proof.steps[1].hash = "zz".to_string();
        assert!(!verify_proof(&tree.root, &leaf, &proof));
        assert!(!verify_proof(&tree.root, "xyz", &proof));
    }

    #[test]
    fn test_proof_json_shape() {
        let tree = MerkleTree::build(&four_leaves()).unwrap();
        let proof = tree.generate_proof(&repeated("aa")).unwrap();
        let json = serde_json::to_value(&proof).unwrap();
        assert!(json["entryHash"].is_string());
        assert!(json["steps"][0]["isLeft"].is_boolean());
    }
}
