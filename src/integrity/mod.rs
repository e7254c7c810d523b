// src/integrity/mod.rs

//! Package integrity: content inventories, merkle roots and release signatures

pub mod certs;
pub mod inventory;
pub mod merkle;
pub mod signing;

pub use certs::{CertName, CertStore, Lookup};
pub use inventory::{Inventory, InventoryBuilder};
pub use merkle::{MerkleTree, MerkleTreeBuilder};
pub use signing::{PackageSigner, SignerIdentity};
