// src/db/schema.rs

//! Database schema definitions and migrations for the package store
//!
//! This module defines the SQLite schema for all core tables and provides
//! a migration system to evolve the schema over time.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        3 => migrate_v3(conn),
        _ => Err(Error::InitError(format!(
            "Unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// - repositories: remote SVN hosts packages are published to
/// - packages: locally installed or authored packages
/// - package_files: external files explicitly added to a package
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            alias TEXT NOT NULL UNIQUE,
            host TEXT NOT NULL,
            api_url TEXT,
            local_path TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            alias TEXT NOT NULL UNIQUE,
            author TEXT NOT NULL,
            repo_alias TEXT NOT NULL,
            version TEXT NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('package', 'project', 'theme')),
            is_local INTEGER NOT NULL DEFAULT 0,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_packages_author ON packages(author);

        CREATE TABLE package_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_alias TEXT NOT NULL,
            path TEXT NOT NULL,
            UNIQUE(package_alias, path),
            FOREIGN KEY (package_alias) REFERENCES packages(alias) ON DELETE CASCADE
        );
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Track the merkle root a working copy was synced at
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        ALTER TABLE packages ADD COLUMN synced_merkle_root TEXT;
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}

/// Schema Version 3: Installer bookkeeping
///
/// - installed_migrations: migration keys applied per package
/// - registry_entries: routes, themes and user types declared by packages
fn migrate_v3(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 3");

    conn.execute_batch(
        "
        CREATE TABLE installed_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_alias TEXT NOT NULL,
            migration_key TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(package_alias, migration_key)
        );

        CREATE TABLE registry_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_alias TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('route', 'theme', 'user_type')),
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            UNIQUE(kind, key)
        );

        CREATE INDEX idx_registry_package ON registry_entries(package_alias);
        ",
    )?;

    info!("Schema version 3 applied successfully");
    Ok(())
}
