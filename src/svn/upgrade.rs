// src/svn/upgrade.rs

//! Upgrading an installed package to its newest release
//!
//! The upgrade is a small state machine:
//!
//! ```text
//! CheckingUpgrades -> CheckingBreakingChanges -> ExportingDiff -> Verifying
//!     -> Installing -> Finalizing -> Done
//! ```
//!
//! with `Aborted` reachable when the operator declines a breaking upgrade.
//! Only files changed between the installed and the target release are
//! downloaded. Every file is snapshotted for rollback before it is
//! overwritten or deleted.

use crate::db;
use crate::db::models::{LocalPackage, PackageFileEntry};
use crate::error::{Error, Result};
use crate::hooks;
use crate::integrity::certs::Lookup;
use crate::integrity::inventory::{hash_file, is_excluded, walk_files};
use crate::integrity::merkle::MerkleTreeBuilder;
use crate::packages::compiler;
use crate::packages::layout::{EXTERNAL_DIR, PathConverter};
use crate::rollback::Rollback;
use crate::svn::changelog::{Changelog, SvnChangelog};
use crate::svn::client::{SvnRepo, tag_dir};
use crate::svn::inventory::SvnInventory;
use crate::svn::lock::PackageLock;
use crate::svn::transport::Reply;
use crate::svn::verify::{self, IS_BREAKING_PROP, PREV_MERKLE_ROOT_PROP, is_truthy};
use crate::svn::Context;
use rusqlite::Connection;
use semver::Version;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    CheckingUpgrades,
    CheckingBreakingChanges,
    ExportingDiff,
    Verifying,
    Installing,
    Finalizing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    /// Breaking releases were confirmed up front
    pub confirm: bool,
    /// Skip signature verification
    pub noverify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    NoUpgrades {
        version: String,
    },
    /// The operator declined breaking releases
    Declined {
        breaking: Vec<String>,
    },
    Upgraded {
        from: String,
        to: String,
        updated: usize,
        deleted: usize,
        /// Rollback transaction recorded for this upgrade
        transaction: String,
        verified: bool,
    },
}

pub struct SvnUpgrade<'c, 'a> {
    ctx: &'c mut Context<'a>,
    svn: SvnRepo,
    package: LocalPackage,
    options: UpgradeOptions,
    state: UpgradeState,
    history: Vec<UpgradeState>,
    candidates: Vec<Version>,
    changelog: Changelog,
    staged: Option<TempDir>,
    rollback: Option<Rollback>,
    verified: bool,
    outcome: Option<UpgradeOutcome>,
}

impl<'c, 'a> SvnUpgrade<'c, 'a> {
    /// Upgrade `alias` to its newest release
    pub fn process(ctx: &'c mut Context<'a>, alias: &str, options: UpgradeOptions) -> Result<UpgradeOutcome> {
        let _lock = PackageLock::acquire(ctx.config, alias)?;
        let package = LocalPackage::get(ctx.conn, alias)?;
        let svn = SvnRepo::for_package(ctx.backend.clone(), ctx.conn, &package, ctx.config)?;

        let mut upgrade = SvnUpgrade {
            ctx,
            svn,
            package,
            options,
            state: UpgradeState::CheckingUpgrades,
            history: Vec::new(),
            candidates: Vec::new(),
            changelog: Changelog::default(),
            staged: None,
            rollback: None,
            verified: false,
            outcome: None,
        };
        upgrade.run()?;
        debug!("Upgrade of {} went {:?}", alias, upgrade.history);

        upgrade
            .outcome
            .ok_or_else(|| Error::InitError(format!("Upgrade of {} ended without an outcome", alias)))
    }

    fn run(&mut self) -> Result<()> {
        loop {
            self.history.push(self.state);
            let next = match self.state {
                UpgradeState::CheckingUpgrades => self.check_upgrades()?,
                UpgradeState::CheckingBreakingChanges => self.check_breaking_changes()?,
                UpgradeState::ExportingDiff => self.export_diff()?,
                UpgradeState::Verifying => self.verify()?,
                UpgradeState::Installing => self.install()?,
                UpgradeState::Finalizing => self.finalize()?,
                UpgradeState::Done | UpgradeState::Aborted => return Ok(()),
            };
            debug!("{}: {:?} -> {:?}", self.package.alias, self.state, next);
            self.state = next;
        }
    }

    fn target(&self) -> Result<String> {
        self.candidates
            .last()
            .map(|v| v.to_string())
            .ok_or_else(|| Error::NotFound(format!("No upgrade target for {}", self.package.alias)))
    }

    fn check_upgrades(&mut self) -> Result<UpgradeState> {
        let installed = Version::parse(self.package.version()).map_err(|e| {
            Error::Parse(format!(
                "{} is installed at {}, which is not a release version: {}",
                self.package.alias,
                self.package.version(),
                e
            ))
        })?;

        let releases = match self.svn.releases() {
            Reply::Ok(releases) => releases,
            Reply::NotFound(_) => Vec::new(),
            Reply::Failed(_) => return Err(self.svn.failure("Unable to list releases")),
        };
        self.candidates = releases.into_iter().filter(|v| *v > installed).collect();

        if self.candidates.is_empty() {
            info!("No upgrades found for {} {}", self.package.alias, installed);
            self.outcome = Some(UpgradeOutcome::NoUpgrades {
                version: installed.to_string(),
            });
            return Ok(UpgradeState::Done);
        }
        Ok(UpgradeState::CheckingBreakingChanges)
    }

    fn check_breaking_changes(&mut self) -> Result<UpgradeState> {
        let mut breaking = Vec::new();
        for candidate in &self.candidates {
            let flag = self.svn.prop(IS_BREAKING_PROP, &tag_dir(&candidate.to_string()))?;
            if flag.as_deref().map(is_truthy).unwrap_or(false) {
                breaking.push(candidate.to_string());
            }
        }

        if !breaking.is_empty() && !self.options.confirm {
            let question = format!(
                "{} {} contain breaking changes. Upgrade anyway?",
                self.package.alias,
                breaking.join(", ")
            );
            if !self.ctx.operator.confirm(&question) {
                info!("Upgrade of {} declined", self.package.alias);
                self.outcome = Some(UpgradeOutcome::Declined { breaking });
                return Ok(UpgradeState::Aborted);
            }
        }
        Ok(UpgradeState::ExportingDiff)
    }

    fn export_diff(&mut self) -> Result<UpgradeState> {
        let target = self.target()?;
        let installed = self.package.version().to_string();
        self.changelog = SvnChangelog::get(&mut self.svn, &installed, Some(&target))?;

        let staged = tempfile::Builder::new().prefix("apex-upgrade-").tempdir()?;
        let target_dir = tag_dir(&target);
        for path in &self.changelog.updated {
            let content = match self.svn.cat(&format!("{}/{}", target_dir, path)) {
                Reply::Ok(content) => content,
                _ => return Err(self.svn.failure(&format!("Unable to download {} of {}", path, target))),
            };
            let dest = staged.path().join(path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, content)?;
        }
        info!(
            "{} {} -> {}: {} files changed, {} deleted",
            self.package.alias,
            installed,
            target,
            self.changelog.updated.len(),
            self.changelog.deleted.len()
        );
        self.staged = Some(staged);

        if self.options.noverify || !self.ctx.config.verify_upgrades {
            let message = format!(
                "WARNING: skipping signature verification of {} {}",
                self.svn.serial(),
                target
            );
            warn!("{}", message);
            self.ctx.operator.notice(&message);
            return Ok(UpgradeState::Installing);
        }
        Ok(UpgradeState::Verifying)
    }

    /// Rebuild the target's tree from the installed release's inventory plus
    /// the downloaded changes, and check it against the target's signature
    fn verify(&mut self) -> Result<UpgradeState> {
        let target = self.target()?;
        let staged = self
            .staged
            .as_ref()
            .ok_or_else(|| Error::InitError("Upgrade files were not staged".to_string()))?;

        let installed_dir = tag_dir(self.package.version());
        let mut inventory = match SvnInventory::fetch(&mut self.svn, &installed_dir)? {
            Lookup::Found(inventory) => inventory,
            Lookup::NotFound => {
                return Err(Error::IntegrityFailure(format!(
                    "{} {} carries no inventory; cannot verify the upgrade to {}",
                    self.svn.serial(),
                    self.package.version(),
                    target
                )));
            }
        };

        for deleted in &self.changelog.deleted {
            let prefix = format!("{}/", deleted);
            let doomed: Vec<String> = inventory
                .iter()
                .map(|(path, _)| path)
                .filter(|path| *path == deleted || path.starts_with(&prefix))
                .cloned()
                .collect();
            for path in doomed {
                inventory.remove(&path);
            }
        }
        for path in &self.changelog.updated {
            inventory.insert(path, hash_file(&staged.path().join(path))?);
        }

        let target_dir = tag_dir(&target);
        let prev = self.svn.prop(PREV_MERKLE_ROOT_PROP, &target_dir)?;
        let tree = MerkleTreeBuilder::build(&self.svn.serial(), &inventory, prev.as_deref());

        match verify::verify(
            &mut self.svn,
            self.ctx.api,
            self.ctx.config,
            &target_dir,
            staged.path(),
            Some(tree),
        )? {
            Some(_) => {
                self.verified = true;
                Ok(UpgradeState::Installing)
            }
            None => Err(Error::IntegrityFailure(format!(
                "Signature verification failed for {} {}; nothing was changed",
                self.svn.serial(),
                target
            ))),
        }
    }

    fn install(&mut self) -> Result<UpgradeState> {
        let target = self.target()?;
        let mut rollback = Rollback::new(self.ctx.config);
        rollback.initialize(&self.package, &target)?;

        if let Err(e) = self.apply(&mut rollback) {
            warn!("Upgrade of {} to {} failed: {}", self.package.alias, target, e);
            match rollback.save(&BTreeMap::new()) {
                Ok(tx) => warn!(
                    "Files changed so far are recorded in rollback transaction {}",
                    tx
                ),
                Err(save) => warn!("Unable to record partial upgrade for rollback: {}", save),
            }
            return Err(e);
        }

        self.rollback = Some(rollback);
        Ok(UpgradeState::Finalizing)
    }

    /// Paths a release may never write to or delete, such as `.apex/`
    fn protected(svn_path: &str, local_path: &str) -> bool {
        is_excluded(Path::new(svn_path)) || is_excluded(Path::new(local_path))
    }

    fn apply(&self, rollback: &mut Rollback) -> Result<()> {
        let staged = self
            .staged
            .as_ref()
            .ok_or_else(|| Error::InitError("Upgrade files were not staged".to_string()))?;
        let alias = &self.package.alias;
        let root = &self.ctx.config.root;
        let converter = PathConverter::new(alias);

        for svn_path in &self.changelog.updated {
            let Some(local_path) = converter.to_local(svn_path) else {
                warn!("Skipping {} of {}: outside the package layout", svn_path, alias);
                continue;
            };
            if Self::protected(svn_path, &local_path) {
                warn!("Skipping {} of {}: protected path", svn_path, alias);
                continue;
            }
            rollback.add_file(alias, &local_path, svn_path)?;
            compiler::install_file(&staged.path().join(svn_path), root, &local_path)?;
        }

        for svn_path in &self.changelog.deleted {
            let Some(local_path) = converter
                .to_local(svn_path)
                .or_else(|| converter.local_dir(svn_path))
            else {
                continue;
            };
            if Self::protected(svn_path, &local_path) {
                warn!("Not deleting {} of {}: protected path", svn_path, alias);
                continue;
            }
            let current = root.join(&local_path);
            if current.is_dir() {
                for (rel, _) in walk_files(&current)? {
                    let file_local = format!("{}/{}", local_path, rel);
                    rollback.add_file(alias, &file_local, &format!("{}/{}", svn_path, rel))?;
                    compiler::remove_file(root, &file_local)?;
                }
            } else if current.is_file() {
                rollback.add_file(alias, &local_path, svn_path)?;
                compiler::remove_file(root, &local_path)?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<UpgradeState> {
        let target = self.target()?;
        let alias = self.package.alias.clone();
        let from = self.package.version().to_string();

        let rollback = self
            .rollback
            .as_mut()
            .ok_or_else(|| Error::InitError("Upgrade has no rollback point".to_string()))?;
        // The files are already replaced; log them before anything else can fail
        let transaction = rollback.save(&BTreeMap::new())?;

        if self.ctx.config.is_slave() {
            debug!("Slave instance, skipping migrations of {}", alias);
        } else {
            let migrations =
                hooks::run_migrations(self.ctx.conn, self.ctx.hooks, &alias, &self.ctx.config.root)
                    .inspect_err(|e| {
                        warn!(
                            "Migrations of {} failed after its files were upgraded; roll back transaction {}: {}",
                            alias, transaction, e
                        )
                    })?;
            if !migrations.is_empty() {
                let mut installed = BTreeMap::new();
                installed.insert(alias.clone(), migrations);
                rollback.save(&installed)?;
            }
        }

        let (package, changelog) = (&mut self.package, &self.changelog);
        db::transaction(self.ctx.conn, |tx| {
            Self::sync_file_registry(tx, &package.alias, changelog)?;
            package.set_version(&target);
            package.save(tx)
        })?;
        self.staged = None;

        info!("Upgraded {} from {} to {}", alias, from, target);
        self.outcome = Some(UpgradeOutcome::Upgraded {
            from,
            to: target,
            updated: self.changelog.updated.len(),
            deleted: self.changelog.deleted.len(),
            transaction,
            verified: self.verified,
        });
        Ok(UpgradeState::Done)
    }

    /// Keep registered external files in line with the release
    fn sync_file_registry(conn: &Connection, alias: &str, changelog: &Changelog) -> Result<()> {
        let prefix = format!("{}/", EXTERNAL_DIR);
        let known: Vec<String> = PackageFileEntry::find_by_package(conn, alias)?
            .into_iter()
            .map(|entry| entry.path)
            .collect();

        for svn_path in &changelog.updated {
            if let Some(local_path) = svn_path.strip_prefix(&prefix) {
                if Self::protected(svn_path, local_path) {
                    continue;
                }
                if !known.iter().any(|k| k == local_path) {
                    PackageFileEntry::new(alias.to_string(), local_path.to_string()).insert(conn)?;
                }
            }
        }
        for svn_path in &changelog.deleted {
            if let Some(local_path) = svn_path.strip_prefix(&prefix) {
                PackageFileEntry::delete(conn, alias, local_path)?;
            }
        }
        Ok(())
    }
}
