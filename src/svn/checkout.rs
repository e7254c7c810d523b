// src/svn/checkout.rs

//! Checking out a package's working copy
//!
//! The local copy of the package is compared with the repository by merkle
//! root first. Only when the roots differ and both sides have files is the
//! operator asked how to reconcile them; `cancel` leaves everything as it was.

use crate::db;
use crate::db::models::{LocalPackage, PackageFileEntry, Repository};
use crate::error::{Error, Result};
use crate::integrity::certs::Lookup;
use crate::integrity::inventory::{Inventory, InventoryBuilder};
use crate::integrity::merkle::MerkleTreeBuilder;
use crate::packages::compiler;
use crate::packages::layout::PathConverter;
use crate::packages::manifest::Manifest;
use crate::svn::client::{SvnRepo, TRUNK};
use crate::svn::inventory::{ConflictPolicy, Divergence, SvnInventory};
use crate::svn::lock::PackageLock;
use crate::svn::transport::Reply;
use crate::svn::verify::{MERKLE_ROOT_PROP, PREV_MERKLE_ROOT_PROP};
use crate::svn::{Context, parse_serial};
use std::fs;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    CheckedOut {
        /// Files and directories the checkout added
        entries: usize,
        policy: ConflictPolicy,
    },
    /// The operator cancelled on an inventory conflict; nothing was changed
    Cancelled { divergent: usize },
}

pub struct SvnCheckout;

impl SvnCheckout {
    /// Check out `dir` (normally trunk) of `serial` into `.apex/svn/{alias}`
    pub fn process(
        ctx: &mut Context<'_>,
        repository: &Repository,
        serial: &str,
        dir: Option<&str>,
    ) -> Result<CheckoutOutcome> {
        let dir = dir.unwrap_or(TRUNK);
        let (author, alias) = parse_serial(serial)?;
        let _lock = PackageLock::acquire(ctx.config, alias)?;

        let wc = ctx.config.working_copy(alias);
        if wc.exists() {
            return Err(Error::AlreadyExists(format!(
                "Working copy of {} already exists at {}",
                serial,
                wc.display()
            )));
        }

        let existing = LocalPackage::find_by_alias(ctx.conn, alias)?;
        let externals: Vec<String> = PackageFileEntry::find_by_package(ctx.conn, alias)?
            .into_iter()
            .map(|entry| entry.path)
            .collect();

        let mut svn = SvnRepo::new(ctx.backend.clone(), repository.clone(), author, alias, ctx.config);
        svn.use_ssh()?;

        let converter = PathConverter::new(alias);
        let local = InventoryBuilder::from_project(&ctx.config.root, &converter, &externals)?;
        let remote_root = svn.prop(MERKLE_ROOT_PROP, dir)?;
        let remote_prev = svn.prop(PREV_MERKLE_ROOT_PROP, dir)?;
        let local_root = MerkleTreeBuilder::build(serial, &local, remote_prev.as_deref()).merkle_root;

        let mut divergent: Vec<Divergence> = Vec::new();
        let policy = match &remote_root {
            None if local.is_empty() => ConflictPolicy::UseRemote,
            None => {
                info!("First checkout of {}, keeping local files", serial);
                ConflictPolicy::UseLocal
            }
            Some(root) if *root == local_root => {
                debug!("{} is in sync with {}", serial, dir);
                ConflictPolicy::UseRemote
            }
            Some(_) if local.is_empty() => ConflictPolicy::UseRemote,
            Some(_) => {
                let remote = match SvnInventory::fetch(&mut svn, dir)? {
                    Lookup::Found(inventory) => inventory,
                    Lookup::NotFound => Inventory::new(),
                };
                let (policy, found) = SvnInventory::compare(serial, &local, &remote, &mut *ctx.operator);
                if policy == ConflictPolicy::Cancel {
                    info!("Checkout of {} cancelled", serial);
                    return Ok(CheckoutOutcome::Cancelled {
                        divergent: found.len(),
                    });
                }
                divergent = found;
                policy
            }
        };

        let entries = match svn.checkout(dir) {
            Reply::Ok(entries) => entries,
            _ => return Err(svn.failure(&format!("Unable to check out {}", dir))),
        };

        let mut new_externals = Vec::new();
        match policy {
            ConflictPolicy::UseLocal => {
                compiler::compile(&ctx.config.root, &converter, &externals, &wc)?;
            }
            ConflictPolicy::Rename => {
                for entry in divergent.iter().filter(|d| d.local.is_some()) {
                    if let Some(local_path) = converter.to_local(&entry.path) {
                        let current = ctx.config.root.join(&local_path);
                        if current.is_file() {
                            fs::rename(&current, ctx.config.root.join(format!("{}.local", local_path)))?;
                        }
                    }
                }
                compiler::materialize(&wc, &ctx.config.root, &converter)?;
            }
            ConflictPolicy::UseRemote | ConflictPolicy::Cancel => {
                for entry in divergent.iter().filter(|d| d.remote.is_none()) {
                    if let Some(local_path) = converter.to_local(&entry.path) {
                        compiler::remove_file(&ctx.config.root, &local_path)?;
                    }
                }
                let written = compiler::materialize(&wc, &ctx.config.root, &converter)?;
                new_externals = written
                    .into_iter()
                    .filter(|f| f.is_external() && !externals.contains(&f.local_path))
                    .map(|f| f.local_path)
                    .collect();
            }
        }

        let mut package = match existing {
            Some(package) => package,
            None => {
                let version = Manifest::load(&wc)?
                    .package
                    .version
                    .unwrap_or_else(|| "dev".to_string());
                LocalPackage::new(alias.to_string(), author.to_string(), repository.alias.clone(), version)
            }
        };
        package.set_synced_merkle_root(remote_root);
        db::transaction(ctx.conn, |tx| {
            package.save(tx)?;
            for path in new_externals {
                PackageFileEntry::new(alias.to_string(), path).insert(tx)?;
            }
            Ok(())
        })?;

        info!("Checked out {} ({} entries, {})", serial, entries, policy);
        Ok(CheckoutOutcome::CheckedOut { entries, policy })
    }
}
