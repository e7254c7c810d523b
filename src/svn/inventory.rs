// src/svn/inventory.rs

//! Local vs. remote inventory comparison
//!
//! Divergent inventories are never reconciled silently: every differing
//! path is shown to the operator, who picks a [`ConflictPolicy`].

use crate::error::Result;
use crate::integrity::certs::Lookup;
use crate::integrity::inventory::Inventory;
use crate::operator::Operator;
use crate::svn::client::SvnRepo;
use crate::svn::transport::Reply;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Remote property holding the JSON inventory of a revision
pub const INVENTORY_PROP: &str = "inventory";

/// How to reconcile a local tree with a divergent remote one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Overwrite local files with the remote ones
    UseRemote,
    /// Keep local files; they become the next commit
    UseLocal,
    /// Move divergent local files aside as `{path}.local`, then use remote
    Rename,
    /// Abort with no changes
    Cancel,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            ConflictPolicy::UseRemote => "use_remote",
            ConflictPolicy::UseLocal => "use_local",
            ConflictPolicy::Rename => "rename",
            ConflictPolicy::Cancel => "cancel",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "use_remote" | "remote" | "r" => Ok(ConflictPolicy::UseRemote),
            "use_local" | "local" | "l" => Ok(ConflictPolicy::UseLocal),
            "rename" | "n" => Ok(ConflictPolicy::Rename),
            "cancel" | "c" => Ok(ConflictPolicy::Cancel),
            other => Err(format!("Unknown conflict policy: {}", other)),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path whose hash differs between the two inventories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub path: String,
    pub local: Option<String>,
    pub remote: Option<String>,
}

impl Divergence {
    pub fn describe(&self) -> &str {
        match (&self.local, &self.remote) {
            (Some(_), Some(_)) => "modified",
            (Some(_), None) => "local only",
            (None, Some(_)) => "remote only",
            (None, None) => "unknown",
        }
    }
}

/// Associative diff of two inventories, in path order
pub fn diff(local: &Inventory, remote: &Inventory) -> Vec<Divergence> {
    let mut out = Vec::new();

    for (path, hash) in local.iter() {
        match remote.get(path) {
            Some(other) if other == hash => {}
            other => out.push(Divergence {
                path: path.clone(),
                local: Some(hash.clone()),
                remote: other.map(|s| s.to_string()),
            }),
        }
    }
    for (path, hash) in remote.iter() {
        if local.get(path).is_none() {
            out.push(Divergence {
                path: path.clone(),
                local: None,
                remote: Some(hash.clone()),
            });
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

pub struct SvnInventory;

impl SvnInventory {
    /// Inventory stored on `dir` of the remote package
    pub fn fetch(svn: &mut SvnRepo, dir: &str) -> Result<Lookup<Inventory>> {
        match svn.propget(INVENTORY_PROP, dir) {
            Reply::Ok(text) => Ok(Lookup::Found(Inventory::from_json(&text)?)),
            Reply::NotFound(_) => Ok(Lookup::NotFound),
            Reply::Failed(_) => Err(svn.failure("Unable to read remote inventory")),
        }
    }

    /// Ask the operator how to reconcile `local` with `remote`
    ///
    /// Identical inventories need no decision and resolve to `UseRemote`.
    pub fn compare(
        serial: &str,
        local: &Inventory,
        remote: &Inventory,
        operator: &mut dyn Operator,
    ) -> (ConflictPolicy, Vec<Divergence>) {
        let divergent = diff(local, remote);
        if divergent.is_empty() {
            debug!("Inventories of {} match", serial);
            return (ConflictPolicy::UseRemote, divergent);
        }

        let policy = operator.choose_policy(serial, &divergent);
        info!(
            "{} divergent files in {}, operator chose {}",
            divergent.len(),
            serial,
            policy
        );
        (policy, divergent)
    }
}
