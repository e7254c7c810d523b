// src/hooks.rs

//! Package hooks and migrations
//!
//! Packages are not scanned for classes at run time. Code that wants to run
//! when a package is installed, migrated or rolled back registers a factory
//! under `(alias, ComponentKind)` at startup; lookups are plain map reads.
//!
//! Migration scripts ship under `etc/migrations/` in the SVN layout. Each
//! file stem is a migration key; keys already recorded in
//! `installed_migrations` are skipped.

use crate::db::models::InstalledMigration;
use crate::error::{Error, Result};
use crate::packages::layout::PathConverter;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a registered factory provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    /// Applies and reverts migration scripts
    Migration,
    /// Runs after files and registry entries are installed
    InstallHook,
}

/// One migration to apply or revert
#[derive(Debug, Clone)]
pub struct MigrationStep<'a> {
    pub alias: &'a str,
    pub key: &'a str,
    pub script: &'a Path,
    pub root: &'a Path,
}

/// Behaviour a package can plug in
///
/// All methods default to doing nothing, so a package registers only what it
/// needs.
pub trait PackageHook {
    fn migrate(&self, _step: &MigrationStep<'_>) -> Result<()> {
        Ok(())
    }

    fn revert(&self, _step: &MigrationStep<'_>) -> Result<()> {
        Ok(())
    }

    fn after_install(&self, _alias: &str, _root: &Path) -> Result<()> {
        Ok(())
    }
}

type Factory = Box<dyn Fn() -> Box<dyn PackageHook> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    factories: BTreeMap<(String, ComponentKind), Factory>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, alias: &str, kind: ComponentKind, factory: F)
    where
        F: Fn() -> Box<dyn PackageHook> + Send + Sync + 'static,
    {
        self.factories
            .insert((alias.to_string(), kind), Box::new(factory));
    }

    pub fn get(&self, alias: &str, kind: ComponentKind) -> Option<Box<dyn PackageHook>> {
        self.factories
            .get(&(alias.to_string(), kind))
            .map(|factory| factory())
    }

    pub fn contains(&self, alias: &str, kind: ComponentKind) -> bool {
        self.factories.contains_key(&(alias.to_string(), kind))
    }

    /// Run the package's install hook, if it registered one
    pub fn after_install(&self, alias: &str, root: &Path) -> Result<()> {
        match self.get(alias, ComponentKind::InstallHook) {
            Some(hook) => hook.after_install(alias, root),
            None => Ok(()),
        }
    }
}

/// Migration scripts of a package in the project, sorted by key
pub fn migration_scripts(root: &Path, alias: &str) -> Result<Vec<(String, PathBuf)>> {
    let converter = PathConverter::new(alias);
    let Some(etc) = converter.local_dir("etc") else {
        return Ok(Vec::new());
    };
    let dir = root.join(etc).join("migrations");
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) {
            scripts.push((stem, path));
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// Apply every migration of `alias` not yet recorded; returns the keys applied
pub fn run_migrations(
    conn: &Connection,
    hooks: &HookRegistry,
    alias: &str,
    root: &Path,
) -> Result<Vec<String>> {
    let installed = InstalledMigration::keys_for(conn, alias)?;
    let handler = hooks.get(alias, ComponentKind::Migration);
    let mut applied = Vec::new();

    for (key, script) in migration_scripts(root, alias)? {
        if installed.contains(&key) {
            continue;
        }
        let step = MigrationStep {
            alias,
            key: &key,
            script: &script,
            root,
        };
        match &handler {
            Some(handler) => handler.migrate(&step).map_err(|e| {
                Error::InitError(format!("Migration {} of {} failed: {}", key, alias, e))
            })?,
            None => debug!("No migration handler for {}, recording {}", alias, key),
        }
        InstalledMigration::record(conn, alias, &key)?;
        applied.push(key);
    }

    if !applied.is_empty() {
        info!("Applied {} migrations of {}", applied.len(), alias);
    }
    Ok(applied)
}

/// Revert `keys` of `alias` in reverse order and forget them
pub fn revert_migrations(
    conn: &Connection,
    hooks: &HookRegistry,
    alias: &str,
    keys: &[String],
    root: &Path,
) -> Result<()> {
    let handler = hooks.get(alias, ComponentKind::Migration);
    let scripts: BTreeMap<String, PathBuf> = migration_scripts(root, alias)?.into_iter().collect();

    for key in keys.iter().rev() {
        if let (Some(handler), Some(script)) = (&handler, scripts.get(key)) {
            handler.revert(&MigrationStep {
                alias,
                key,
                script,
                root,
            })?;
        }
        InstalledMigration::remove(conn, alias, key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl PackageHook for Recorder {
        fn migrate(&self, step: &MigrationStep<'_>) -> Result<()> {
            self.0.lock().unwrap().push(format!("up {}", step.key));
            Ok(())
        }

        fn revert(&self, step: &MigrationStep<'_>) -> Result<()> {
            self.0.lock().unwrap().push(format!("down {}", step.key));
            Ok(())
        }
    }

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "-- sql").unwrap();
    }

    #[test]
    fn test_registry_lookup() {
        let mut hooks = HookRegistry::new();
        assert!(hooks.get("shop", ComponentKind::Migration).is_none());

        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = log.clone();
        hooks.register("shop", ComponentKind::Migration, move || {
            Box::new(Recorder(shared.clone()))
        });
        assert!(hooks.contains("shop", ComponentKind::Migration));
        assert!(!hooks.contains("shop", ComponentKind::InstallHook));
        assert!(hooks.after_install("shop", Path::new("/")).is_ok());
    }

    #[test]
    fn test_migrations_run_once_and_revert() {
        let conn = db::open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO packages (alias, author, repo_alias, version, type) VALUES ('shop', 'jsmith', 'main', '1.0.0', 'package')",
            [],
        )
        .unwrap();
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "etc/Shop/migrations/001_init.sql");
        write(root.path(), "etc/Shop/migrations/002_orders.sql");

        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = log.clone();
        let mut hooks = HookRegistry::new();
        hooks.register("shop", ComponentKind::Migration, move || {
            Box::new(Recorder(shared.clone()))
        });

        let applied = run_migrations(&conn, &hooks, "shop", root.path()).unwrap();
        assert_eq!(applied, vec!["001_init", "002_orders"]);
        assert!(run_migrations(&conn, &hooks, "shop", root.path()).unwrap().is_empty());

        revert_migrations(&conn, &hooks, "shop", &applied, root.path()).unwrap();
        assert!(InstalledMigration::keys_for(&conn, "shop").unwrap().is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["up 001_init", "up 002_orders", "down 002_orders", "down 001_init"]
        );
    }
}
