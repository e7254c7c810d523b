// src/rollback.rs

//! Upgrade rollback
//!
//! Before an upgrade overwrites or deletes a file, the current content is
//! snapshotted (zstd-compressed) under
//! `.apex/upgrades/{alias}/{version}/{transaction}/files/`. The transaction's
//! metadata lives next to it in `config.json`, and
//! `.apex/upgrades/installs.json` maps each transaction timestamp to
//! `{alias: previous_version}`.
//!
//! Snapshot directories are never reused: a retried upgrade to the same
//! version records a new transaction beside the failed one.
//!
//! Transactions are undone newest first. A transaction leaves the log only
//! once all of its files are back in place.

use crate::config::Config;
use crate::db::models::LocalPackage;
use crate::error::{Error, Result};
use crate::hooks::{self, HookRegistry};
use crate::packages::compiler;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const INSTALLS_FILE: &str = "installs.json";
const CONFIG_FILE: &str = "config.json";
const SNAPSHOT_DIR: &str = "files";
const ZSTD_LEVEL: i32 = 3;

/// Snapshot of one file taken before an upgrade touched it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub local_path: String,
    pub svn_path: String,
    /// Compressed copy under `files/`; None when the file did not exist yet
    pub snapshot: Option<String>,
}

/// `config.json` of one package within a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    pub transaction: String,
    pub alias: String,
    pub from_version: String,
    pub to_version: String,
    pub created_at: String,
    #[serde(default)]
    pub files: Vec<FileSnapshot>,
    #[serde(default)]
    pub migrations: Vec<String>,
}

/// The whole-file transaction log, `{timestamp: {alias: previous_version}}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackLog {
    path: PathBuf,
    pub entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl RollbackLog {
    pub fn load(upgrades_dir: &Path) -> Result<Self> {
        let path = upgrades_dir.join(INSTALLS_FILE);
        let entries = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Timestamps, newest first
    pub fn newest_first(&self) -> Vec<String> {
        self.entries.keys().rev().cloned().collect()
    }
}

/// Timestamp key that sorts chronologically as a string
fn transaction_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S%6f").to_string()
}

fn version_dir(upgrades_dir: &Path, alias: &str, version: &str) -> PathBuf {
    upgrades_dir.join(alias).join(version)
}

struct Pending {
    dir: PathBuf,
    config: TransactionConfig,
}

/// A rollback transaction being recorded during an upgrade
pub struct Rollback {
    root: PathBuf,
    upgrades_dir: PathBuf,
    transaction: String,
    packages: BTreeMap<String, Pending>,
}

impl Rollback {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.root.clone(),
            upgrades_dir: config.upgrades_dir(),
            transaction: transaction_id(),
            packages: BTreeMap::new(),
        }
    }

    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// Start recording `package`'s move to `target_version`
    pub fn initialize(&mut self, package: &LocalPackage, target_version: &str) -> Result<()> {
        let dir = version_dir(&self.upgrades_dir, &package.alias, target_version).join(&self.transaction);
        if dir.exists() {
            return Err(Error::AlreadyExists(format!(
                "Rollback data for {} in transaction {}",
                package.alias, self.transaction
            )));
        }
        fs::create_dir_all(dir.join(SNAPSHOT_DIR))?;

        self.packages.insert(
            package.alias.clone(),
            Pending {
                dir,
                config: TransactionConfig {
                    transaction: self.transaction.clone(),
                    alias: package.alias.clone(),
                    from_version: package.version().to_string(),
                    to_version: target_version.to_string(),
                    created_at: Utc::now().to_rfc3339(),
                    files: Vec::new(),
                    migrations: Vec::new(),
                },
            },
        );
        debug!("Rollback point for {} -> {}", package.alias, target_version);
        Ok(())
    }

    /// Snapshot the current content of `local_path` before it is overwritten or deleted
    ///
    /// Only the first snapshot of a path counts, so repeated writes keep the
    /// pre-upgrade content.
    pub fn add_file(&mut self, alias: &str, local_path: &str, svn_path: &str) -> Result<()> {
        let pending = self.packages.get_mut(alias).ok_or_else(|| {
            Error::NotFound(format!("No rollback point initialized for {}", alias))
        })?;
        if pending.config.files.iter().any(|f| f.local_path == local_path) {
            return Ok(());
        }

        let current = self.root.join(local_path);
        let snapshot = if current.is_file() {
            let name = format!("{}.zst", pending.config.files.len());
            let data = fs::read(&current)?;
            let compressed = zstd::encode_all(data.as_slice(), ZSTD_LEVEL)?;
            fs::write(pending.dir.join(SNAPSHOT_DIR).join(&name), compressed)?;
            Some(name)
        } else {
            None
        };

        pending.config.files.push(FileSnapshot {
            local_path: local_path.to_string(),
            svn_path: svn_path.to_string(),
            snapshot,
        });
        Ok(())
    }

    /// Write every `config.json` and add the transaction to the log
    ///
    /// Saving again rewrites the metadata in place, e.g. once migrations ran.
    pub fn save(&mut self, installed_migrations: &BTreeMap<String, Vec<String>>) -> Result<String> {
        let mut log = RollbackLog::load(&self.upgrades_dir)?;
        let mut entry = BTreeMap::new();

        for (alias, pending) in &mut self.packages {
            if let Some(keys) = installed_migrations.get(alias) {
                pending.config.migrations = keys.clone();
            }
            fs::write(
                pending.dir.join(CONFIG_FILE),
                serde_json::to_string_pretty(&pending.config)?,
            )?;
            entry.insert(alias.clone(), pending.config.from_version.clone());
        }

        log.entries.insert(self.transaction.clone(), entry);
        log.save()?;
        info!("Saved rollback transaction {}", self.transaction);
        Ok(self.transaction.clone())
    }
}

/// What one restored transaction changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub transaction: String,
    /// `(alias, version restored to)`
    pub packages: Vec<(String, String)>,
    pub files: usize,
}

/// Find the `config.json` of `alias` belonging to `transaction`
fn find_config(upgrades_dir: &Path, alias: &str, transaction: &str) -> Result<(PathBuf, TransactionConfig)> {
    let alias_dir = upgrades_dir.join(alias);
    if alias_dir.is_dir() {
        for entry in fs::read_dir(&alias_dir)? {
            let dir = entry?.path().join(transaction);
            let file = dir.join(CONFIG_FILE);
            if file.is_file() {
                let config: TransactionConfig = serde_json::from_str(&fs::read_to_string(&file)?)?;
                return Ok((dir, config));
            }
        }
    }
    Err(Error::NotFound(format!(
        "Rollback data for {} in transaction {}",
        alias, transaction
    )))
}

/// Restores recorded transactions
pub struct Restorer<'a> {
    config: &'a Config,
    conn: &'a Connection,
    hooks: &'a HookRegistry,
}

impl<'a> Restorer<'a> {
    pub fn new(config: &'a Config, conn: &'a Connection, hooks: &'a HookRegistry) -> Self {
        Self {
            config,
            conn,
            hooks,
        }
    }

    /// The transaction log as it stands
    pub fn log(&self) -> Result<RollbackLog> {
        RollbackLog::load(&self.config.upgrades_dir())
    }

    /// Per-package metadata of a transaction, for confirmation prompts
    pub fn describe(&self, transaction: &str) -> Result<Vec<TransactionConfig>> {
        let log = self.log()?;
        let entry = log
            .entries
            .get(transaction)
            .ok_or_else(|| Error::NotFound(format!("Rollback transaction {}", transaction)))?;
        entry
            .keys()
            .map(|alias| find_config(&self.config.upgrades_dir(), alias, transaction).map(|(_, c)| c))
            .collect()
    }

    /// Undo the newest transaction
    pub fn rollback_latest(&self) -> Result<Option<RestoreReport>> {
        match self.log()?.newest_first().into_iter().next() {
            Some(transaction) => self.restore(&transaction).map(Some),
            None => Ok(None),
        }
    }

    /// Undo every transaction at or after `since`, newest first
    pub fn rollback_since(&self, since: &str) -> Result<Vec<RestoreReport>> {
        let mut reports = Vec::new();
        for transaction in self.log()?.newest_first() {
            if transaction.as_str() < since {
                break;
            }
            reports.push(self.restore(&transaction)?);
        }
        Ok(reports)
    }

    /// Undo the transactions that moved `alias` to `version`, and every newer one
    ///
    /// A failed upgrade and its retry both target the same version; the
    /// oldest of them is where the rollback stops.
    pub fn process(&self, alias: &str, version: &str) -> Result<Vec<RestoreReport>> {
        let log = self.log()?;
        let dir = version_dir(&self.config.upgrades_dir(), alias, version);
        let mut oldest: Option<String> = None;
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.path().join(CONFIG_FILE).is_file() {
                    continue;
                }
                let transaction = entry.file_name().to_string_lossy().into_owned();
                let logged = log
                    .entries
                    .get(&transaction)
                    .is_some_and(|packages| packages.contains_key(alias));
                if logged && oldest.as_ref().is_none_or(|o| transaction < *o) {
                    oldest = Some(transaction);
                }
            }
        }
        match oldest {
            Some(transaction) => self.rollback_since(&transaction),
            None => Err(Error::NotFound(format!(
                "No rollback point for {} {}",
                alias, version
            ))),
        }
    }

    /// Restore one transaction
    ///
    /// Only the newest logged transaction may be restored, so files always
    /// come back in reverse chronological order.
    pub fn restore(&self, transaction: &str) -> Result<RestoreReport> {
        let mut log = self.log()?;
        let newest = log.newest_first().into_iter().next();
        if newest.as_deref() != Some(transaction) {
            return Err(Error::Conflict(format!(
                "Transaction {} is not the newest; roll back newer transactions first",
                transaction
            )));
        }
        let entry = log.entries.get(transaction).cloned().unwrap_or_default();
        let upgrades_dir = self.config.upgrades_dir();

        let mut report = RestoreReport {
            transaction: transaction.to_string(),
            packages: Vec::new(),
            files: 0,
        };

        for (alias, prev_version) in &entry {
            let (dir, tx) = find_config(&upgrades_dir, alias, transaction)?;

            if !self.config.is_slave() {
                hooks::revert_migrations(self.conn, self.hooks, alias, &tx.migrations, &self.config.root)?;
            }

            for file in tx.files.iter().rev() {
                match &file.snapshot {
                    Some(name) => {
                        let compressed = fs::read(dir.join(SNAPSHOT_DIR).join(name))?;
                        let data = zstd::decode_all(compressed.as_slice())?;
                        let dest = self.config.root.join(&file.local_path);
                        if let Some(parent) = dest.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::write(&dest, data)?;
                    }
                    None => {
                        compiler::remove_file(&self.config.root, &file.local_path)?;
                    }
                }
                report.files += 1;
            }

            match LocalPackage::find_by_alias(self.conn, alias)? {
                Some(mut package) => {
                    package.set_version(prev_version);
                    package.save(self.conn)?;
                }
                None => warn!("{} is no longer installed; restored files only", alias),
            }

            fs::remove_dir_all(&dir)?;
            if let Some(parent) = dir.parent() {
                // only succeeds once no other transaction targets this version
                let _ = fs::remove_dir(parent);
            }
            report.packages.push((alias.clone(), prev_version.clone()));
            info!("Rolled back {} to {}", alias, prev_version);
        }

        log.entries.remove(transaction);
        log.save()?;
        Ok(report)
    }
}
