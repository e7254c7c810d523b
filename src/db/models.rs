// src/db/models.rs

//! Data models for package store entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Kind of distributable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Package,
    Project,
    Theme,
}

impl PackageType {
    pub fn as_str(&self) -> &str {
        match self {
            PackageType::Package => "package",
            PackageType::Project => "project",
            PackageType::Theme => "theme",
        }
    }
}

impl FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "package" => Ok(PackageType::Package),
            "project" => Ok(PackageType::Project),
            "theme" => Ok(PackageType::Theme),
            _ => Err(format!("Invalid package type: {}", s)),
        }
    }
}

/// A package known to this installation
///
/// Mutating `version`, `author` or `repo_alias` through the setters marks the
/// record dirty; `save` only writes dirty or new records.
#[derive(Debug, Clone)]
pub struct LocalPackage {
    pub id: Option<i64>,
    pub alias: String,
    author: String,
    repo_alias: String,
    version: String,
    pub package_type: PackageType,
    pub is_local: bool,
    pub installed_at: Option<String>,
    synced_merkle_root: Option<String>,
    dirty: bool,
}

const PACKAGE_COLUMNS: &str =
    "id, alias, author, repo_alias, version, type, is_local, installed_at, synced_merkle_root";

impl LocalPackage {
    /// Create a new, unsaved package record
    pub fn new(alias: String, author: String, repo_alias: String, version: String) -> Self {
        Self {
            id: None,
            alias,
            author,
            repo_alias,
            version,
            package_type: PackageType::Package,
            is_local: false,
            installed_at: None,
            synced_merkle_root: None,
            dirty: true,
        }
    }

    /// `author/alias`, unique on a given repository
    pub fn serial(&self) -> String {
        format!("{}/{}", self.author, self.alias)
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn repo_alias(&self) -> &str {
        &self.repo_alias
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Merkle root of the last checkout or commit
    pub fn synced_merkle_root(&self) -> Option<&str> {
        self.synced_merkle_root.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_version(&mut self, version: &str) {
        if self.version != version {
            self.version = version.to_string();
            self.dirty = true;
        }
    }

    pub fn set_author(&mut self, author: &str) {
        if self.author != author {
            self.author = author.to_string();
            self.dirty = true;
        }
    }

    pub fn set_repo_alias(&mut self, repo_alias: &str) {
        if self.repo_alias != repo_alias {
            self.repo_alias = repo_alias.to_string();
            self.dirty = true;
        }
    }

    pub fn set_synced_merkle_root(&mut self, root: Option<String>) {
        if self.synced_merkle_root != root {
            self.synced_merkle_root = root;
            self.dirty = true;
        }
    }

    /// Record that the package now exists on its repository
    pub fn mark_published(&mut self) {
        if self.is_local {
            self.is_local = false;
            self.dirty = true;
        }
    }

    /// Insert or update this package, skipping the write when nothing changed
    pub fn save(&mut self, conn: &Connection) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        match self.id {
            None => {
                conn.execute(
                    "INSERT INTO packages (alias, author, repo_alias, version, type, is_local, synced_merkle_root)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        &self.alias,
                        &self.author,
                        &self.repo_alias,
                        &self.version,
                        self.package_type.as_str(),
                        self.is_local,
                        &self.synced_merkle_root,
                    ],
                )?;
                self.id = Some(conn.last_insert_rowid());
            }
            Some(id) => {
                conn.execute(
                    "UPDATE packages SET author = ?1, repo_alias = ?2, version = ?3, type = ?4,
                         is_local = ?5, synced_merkle_root = ?6
                     WHERE id = ?7",
                    params![
                        &self.author,
                        &self.repo_alias,
                        &self.version,
                        self.package_type.as_str(),
                        self.is_local,
                        &self.synced_merkle_root,
                        id,
                    ],
                )?;
            }
        }

        self.dirty = false;
        Ok(())
    }

    /// Find a package by alias
    pub fn find_by_alias(conn: &Connection, alias: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE alias = ?1",
            PACKAGE_COLUMNS
        ))?;

        let package = stmt.query_row([alias], Self::from_row).optional()?;

        Ok(package)
    }

    /// Find a package by alias, failing with NotFound
    pub fn get(conn: &Connection, alias: &str) -> Result<Self> {
        Self::find_by_alias(conn, alias)?
            .ok_or_else(|| Error::NotFound(format!("Package '{}' is not installed", alias)))
    }

    /// Whether `alias` exists in the local store
    pub fn exists(conn: &Connection, alias: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE alias = ?1",
            [alias],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List all packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY alias",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Delete a package by alias
    pub fn delete(conn: &Connection, alias: &str) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE alias = ?1", [alias])?;
        Ok(())
    }

    /// Convert a database row to a LocalPackage
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let type_str: String = row.get(5)?;
        let package_type = type_str.parse::<PackageType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            alias: row.get(1)?,
            author: row.get(2)?,
            repo_alias: row.get(3)?,
            version: row.get(4)?,
            package_type,
            is_local: row.get(6)?,
            installed_at: row.get(7)?,
            synced_merkle_root: row.get(8)?,
            dirty: false,
        })
    }
}

/// A remote SVN repository packages are published to
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: Option<i64>,
    pub alias: String,
    /// Hostname serving `svn://` and `svn+ssh://`
    pub host: String,
    /// Base URL of the repository JSON API
    pub api_url: Option<String>,
    /// Set for `file://` repositories that live on this machine
    pub local_path: Option<String>,
}

impl Repository {
    /// Create a new Repository
    pub fn new(alias: String, host: String) -> Self {
        Self {
            id: None,
            alias,
            host,
            api_url: None,
            local_path: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// API base URL, defaulting to `https://{host}/api`
    pub fn api_base(&self) -> String {
        self.api_url
            .clone()
            .unwrap_or_else(|| format!("https://{}/api", self.host))
    }

    /// Insert this repository into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO repositories (alias, host, api_url, local_path) VALUES (?1, ?2, ?3, ?4)",
            params![&self.alias, &self.host, &self.api_url, &self.local_path],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a repository by alias
    pub fn find_by_alias(conn: &Connection, alias: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, alias, host, api_url, local_path FROM repositories WHERE alias = ?1",
        )?;

        let repo = stmt.query_row([alias], Self::from_row).optional()?;

        Ok(repo)
    }

    /// Find a repository by alias, failing with NotFound
    pub fn get(conn: &Connection, alias: &str) -> Result<Self> {
        Self::find_by_alias(conn, alias)?
            .ok_or_else(|| Error::NotFound(format!("Repository '{}' not found", alias)))
    }

    /// List all repositories
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, alias, host, api_url, local_path FROM repositories ORDER BY alias",
        )?;

        let repos = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    /// Delete a repository by alias
    pub fn delete(conn: &Connection, alias: &str) -> Result<()> {
        conn.execute("DELETE FROM repositories WHERE alias = ?1", [alias])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            alias: row.get(1)?,
            host: row.get(2)?,
            api_url: row.get(3)?,
            local_path: row.get(4)?,
        })
    }
}

/// An external file explicitly added to a package's file registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFileEntry {
    pub id: Option<i64>,
    pub package_alias: String,
    /// Path relative to the project root
    pub path: String,
}

impl PackageFileEntry {
    pub fn new(package_alias: String, path: String) -> Self {
        Self {
            id: None,
            package_alias,
            path,
        }
    }

    /// Insert this entry, ignoring duplicates
    pub fn insert(&mut self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO package_files (package_alias, path) VALUES (?1, ?2)",
            params![&self.package_alias, &self.path],
        )?;
        self.id = Some(conn.last_insert_rowid());
        Ok(())
    }

    /// Find all registry entries for a package
    pub fn find_by_package(conn: &Connection, alias: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_alias, path FROM package_files WHERE package_alias = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([alias], |row| {
                Ok(Self {
                    id: Some(row.get(0)?),
                    package_alias: row.get(1)?,
                    path: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    pub fn delete(conn: &Connection, alias: &str, path: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM package_files WHERE package_alias = ?1 AND path = ?2",
            [alias, path],
        )?;
        Ok(())
    }
}

/// Migration keys applied for a package
pub struct InstalledMigration;

impl InstalledMigration {
    pub fn record(conn: &Connection, alias: &str, key: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO installed_migrations (package_alias, migration_key) VALUES (?1, ?2)",
            [alias, key],
        )?;
        Ok(())
    }

    pub fn keys_for(conn: &Connection, alias: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT migration_key FROM installed_migrations WHERE package_alias = ?1 ORDER BY migration_key",
        )?;
        let keys = stmt
            .query_map([alias], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub fn remove(conn: &Connection, alias: &str, key: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM installed_migrations WHERE package_alias = ?1 AND migration_key = ?2",
            [alias, key],
        )?;
        Ok(())
    }
}

/// Kind of registry entry a package can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Route,
    Theme,
    UserType,
}

impl RegistryKind {
    pub fn as_str(&self) -> &str {
        match self {
            RegistryKind::Route => "route",
            RegistryKind::Theme => "theme",
            RegistryKind::UserType => "user_type",
        }
    }
}

/// A route, theme or user type declared by a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub package_alias: String,
    pub kind: RegistryKind,
    pub key: String,
    pub value: String,
}

impl RegistryEntry {
    /// Insert or replace this entry; later installs win on key collisions
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO registry_entries (package_alias, kind, key, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind, key) DO UPDATE SET package_alias = excluded.package_alias, value = excluded.value",
            params![&self.package_alias, self.kind.as_str(), &self.key, &self.value],
        )?;
        Ok(())
    }

    pub fn count_for(conn: &Connection, alias: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM registry_entries WHERE package_alias = ?1",
            [alias],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
