// src/integrity/merkle.rs

//! Merkle commitments over package inventories
//!
//! Leaves are `H(0x00 || path || 0x00 || hash)` taken in path order; interior
//! nodes are `H(0x01 || left || right)`, with an odd trailing node promoted
//! unchanged. The root is then bound to the previous revision's root:
//! `H(0x02 || tree_root || prev_root)`, so every revision commits to its
//! whole history.

use crate::integrity::inventory::Inventory;
use sha2::{Digest, Sha256};

type Node = [u8; 32];

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;
const CHAIN_TAG: u8 = 0x02;

/// Root hash of an empty inventory
const EMPTY_ROOT: Node = [0u8; 32];

/// A merkle commitment to one revision of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    pub package: String,
    pub merkle_root: String,
    pub prev_merkle_root: Option<String>,
    pub files: Inventory,
}

fn leaf(path: &str, hash: &str) -> Node {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(hash.as_bytes());
    hasher.finalize().into()
}

fn parent(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn tree_root(inventory: &Inventory) -> Node {
    let mut level: Vec<Node> = inventory
        .iter()
        .map(|(path, hash)| leaf(path, hash))
        .collect();

    if level.is_empty() {
        return EMPTY_ROOT;
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => parent(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two nodes"),
            })
            .collect();
    }

    level[0]
}

fn hex(node: &Node) -> String {
    node.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Builds merkle trees; pure over its inputs
pub struct MerkleTreeBuilder;

impl MerkleTreeBuilder {
    /// Commit to `inventory` chained onto `prev_merkle_root`
    pub fn build(package: &str, inventory: &Inventory, prev_merkle_root: Option<&str>) -> MerkleTree {
        let root = tree_root(inventory);

        let mut hasher = Sha256::new();
        hasher.update([CHAIN_TAG]);
        hasher.update(root);
        if let Some(prev) = prev_merkle_root {
            hasher.update(prev.as_bytes());
        }
        let chained: Node = hasher.finalize().into();

        MerkleTree {
            package: package.to_string(),
            merkle_root: hex(&chained),
            prev_merkle_root: prev_merkle_root.map(|s| s.to_string()),
            files: inventory.clone(),
        }
    }
}
