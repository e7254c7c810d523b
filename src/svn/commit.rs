// src/svn/commit.rs

//! Committing a package
//!
//! Each step gates the next; a failure stops before anything is sent:
//!
//! 1. create the remote repository on the first commit
//! 2. refuse if the repository moved past the last synced merkle root
//! 3. drop registered external files that no longer exist
//! 4. compile the project into the working copy
//! 5. schedule unversioned files for addition and missing ones for removal
//! 6. sign the new merkle root
//! 7. commit

use crate::db::models::{LocalPackage, PackageFileEntry, PackageType, Repository};
use crate::error::{Error, Result};
use crate::integrity::inventory::{InventoryBuilder, is_excluded};
use crate::integrity::merkle::MerkleTreeBuilder;
use crate::packages::compiler::{self, CompileReport};
use crate::packages::layout::PathConverter;
use crate::packages::manifest::Manifest;
use crate::svn::client::{SvnRepo, TRUNK};
use crate::svn::lock::PackageLock;
use crate::svn::transport::{CommitMessage, Reply};
use crate::svn::verify::{self, MERKLE_ROOT_PROP, PREV_MERKLE_ROOT_PROP};
use crate::svn::{Context, parse_serial};
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// None when there was nothing to commit
    pub revision: Option<u64>,
    pub merkle_root: Option<String>,
    pub first_commit: bool,
    pub compiled: CompileReport,
    pub added: usize,
    pub removed: usize,
}

pub struct SvnCommit;

impl SvnCommit {
    /// Register a package authored in this project, unpublished until its first commit
    ///
    /// Running it again before that commit re-targets the package to another
    /// author or repository.
    pub fn create(
        conn: &Connection,
        repository: &Repository,
        serial: &str,
        package_type: PackageType,
    ) -> Result<LocalPackage> {
        let (author, alias) = parse_serial(serial)?;
        let mut package = match LocalPackage::find_by_alias(conn, alias)? {
            Some(existing) if !existing.is_local => {
                return Err(Error::AlreadyExists(format!(
                    "{} is already published as {}",
                    alias,
                    existing.serial()
                )));
            }
            Some(mut existing) => {
                debug!("Re-targeting unpublished {} to {} on {}", alias, serial, repository.alias);
                existing.set_author(author);
                existing.set_repo_alias(&repository.alias);
                existing
            }
            None => {
                let mut package = LocalPackage::new(
                    alias.to_string(),
                    author.to_string(),
                    repository.alias.clone(),
                    "dev".to_string(),
                );
                package.package_type = package_type;
                package.is_local = true;
                package
            }
        };
        package.save(conn)?;
        info!("Created {} on {}", package.serial(), package.repo_alias());
        Ok(package)
    }

    pub fn process(ctx: &mut Context<'_>, alias: &str, message: &CommitMessage) -> Result<CommitReport> {
        let _lock = PackageLock::acquire(ctx.config, alias)?;
        let mut package = LocalPackage::get(ctx.conn, alias)?;
        let serial = package.serial();

        let mut svn = SvnRepo::for_package(ctx.backend.clone(), ctx.conn, &package, ctx.config)?;
        svn.use_ssh()?;

        let access = ctx.api.check(&serial)?;
        if access.exists && !access.can_write {
            return Err(Error::PermissionDenied(format!(
                "No write access to {} on {}",
                serial,
                svn.repository().alias
            )));
        }

        let first_commit = !svn.exists();
        if first_commit {
            info!("First commit of {}, creating repository", serial);
            if !access.exists {
                ctx.api.create(&serial, package.package_type)?;
            }
            svn.create_layout()?;
        }

        let wc = ctx.config.working_copy(alias);
        if !wc.exists() {
            if !first_commit {
                return Err(Error::NotFound(format!(
                    "No working copy of {}; check it out first",
                    serial
                )));
            }
            if !svn.checkout(TRUNK).is_ok() {
                return Err(svn.failure("Unable to check out the new trunk"));
            }
        }

        let remote_root = svn.prop(MERKLE_ROOT_PROP, TRUNK)?;
        if !first_commit {
            if let Some(remote) = &remote_root {
                if package.synced_merkle_root() != Some(remote.as_str()) {
                    return Err(Error::StaleWorkingCopy(format!(
                        "{} has changed on the repository since your last checkout (remote root {}); please update first",
                        serial, remote
                    )));
                }
            }
        }

        let externals = Self::clean_file_registry(ctx, alias)?;

        let converter = PathConverter::new(alias);
        let compiled = compiler::compile(&ctx.config.root, &converter, &externals, &wc)?;

        let (added, removed) = Self::schedule(&mut svn)?;

        let inventory = InventoryBuilder::from_tree(&wc)?;
        let remote_prev = svn.prop(PREV_MERKLE_ROOT_PROP, TRUNK)?;
        if let Some(remote) = &remote_root {
            let unchanged = MerkleTreeBuilder::build(&serial, &inventory, remote_prev.as_deref());
            if unchanged.merkle_root == *remote {
                info!("Nothing to commit for {}", serial);
                return Ok(CommitReport {
                    first_commit,
                    compiled,
                    added,
                    removed,
                    ..Default::default()
                });
            }
        }

        let tree = verify::sign_package(&mut svn, ctx.config, &mut *ctx.operator, &inventory, remote_root.as_deref())?;

        let revision = match svn.commit(message) {
            Reply::Ok(revision) => revision,
            _ => return Err(svn.failure("Commit failed")),
        };

        package.set_synced_merkle_root(Some(tree.merkle_root.clone()));
        package.mark_published();
        package.save(ctx.conn)?;

        let manifest = Manifest::load(&wc)?;
        let fields = json!({
            "version": manifest.package.version,
            "description": manifest.package.description,
        });
        if let Err(e) = ctx.api.update(&serial, &fields) {
            warn!("Committed {} but could not update repository metadata: {}", serial, e);
        }

        info!("Committed {} as revision {}", serial, revision);
        Ok(CommitReport {
            revision: Some(revision),
            merkle_root: Some(tree.merkle_root),
            first_commit,
            compiled,
            added,
            removed,
        })
    }

    /// Forget external files that were deleted from the project; returns the rest
    fn clean_file_registry(ctx: &Context<'_>, alias: &str) -> Result<Vec<String>> {
        let mut kept = Vec::new();
        for entry in PackageFileEntry::find_by_package(ctx.conn, alias)? {
            if ctx.config.root.join(&entry.path).is_file() {
                kept.push(entry.path);
            } else {
                debug!("Dropping missing file {} from {}", entry.path, alias);
                PackageFileEntry::delete(ctx.conn, alias, &entry.path)?;
            }
        }
        Ok(kept)
    }

    /// `svn add` unversioned and `svn rm` missing paths
    fn schedule(svn: &mut SvnRepo) -> Result<(usize, usize)> {
        let entries = match svn.status() {
            Reply::Ok(entries) => entries,
            _ => return Err(svn.failure("Unable to read working copy status")),
        };

        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();
        for entry in entries {
            if is_excluded(Path::new(&entry.path)) {
                continue;
            }
            match entry.code {
                '?' => to_add.push(entry.path),
                '!' => to_remove.push(entry.path),
                _ => {}
            }
        }

        if !to_add.is_empty() && !svn.add(&to_add).is_ok() {
            return Err(svn.failure("Unable to add new files"));
        }
        if !to_remove.is_empty() && !svn.remove(&to_remove).is_ok() {
            return Err(svn.failure("Unable to remove deleted files"));
        }
        debug!("Scheduled {} additions and {} removals", to_add.len(), to_remove.len());
        Ok((to_add.len(), to_remove.len()))
    }
}
