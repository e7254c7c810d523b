// src/db/mod.rs

//! Local package store
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Connection management
//! - Transaction handling
//! - CRUD operations for packages, repositories, file registry entries, etc.

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::{debug, info};

/// Initialize a new package store at the specified path
///
/// Creates the database file and brings the schema up to date.
/// This is idempotent - calling it on an existing database is safe.
///
/// # Arguments
///
/// * `db_path` - Path where the database should be created
///
/// # Returns
///
/// * `Result<()>` - Ok if successful, Error otherwise
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing package store
///
/// # Arguments
///
/// * `db_path` - Path to the database file
///
/// # Returns
///
/// * `Result<Connection>` - Database connection if successful
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    Ok(conn)
}

/// Open an in-memory store with the full schema applied
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    schema::migrate(&conn)?;
    Ok(conn)
}

/// Run `f` inside a transaction, committing only if it returns Ok
///
/// Takes a shared connection since package operations hold one through
/// their context. Must not be nested.
pub fn transaction<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.unchecked_transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_init_creates_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();

        // Remove the temp file so init can create it
        drop(temp_file);

        let result = init(&db_path);
        assert!(result.is_ok());
        assert!(Path::new(&db_path).exists());
    }

    #[test]
    fn test_open_existing_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        init(db_path).unwrap();

        let result = open(db_path);
        assert!(result.is_ok());
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = open("/nonexistent/path/db.sqlite");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::DatabaseNotFound(_)));
    }

    #[test]
    fn test_transaction_commits_on_shared_connection() {
        let conn = open_in_memory().unwrap();

        let rows = transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO repositories (alias, host) VALUES ('main', 'svn.example.com')",
                [],
            )?;
            Ok(tx.last_insert_rowid())
        })
        .unwrap();
        assert_eq!(rows, 1);

        // the connection is free for the next transaction
        transaction(&conn, |tx| {
            tx.execute("DELETE FROM repositories", [])?;
            Ok(())
        })
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let conn = open_in_memory().unwrap();

        let result: Result<()> = transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO repositories (alias, host) VALUES ('main', 'svn.example.com')",
                [],
            )?;
            Err(Error::Conflict("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
