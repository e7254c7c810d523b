// src/error.rs

use thiserror::Error;

/// Core error types for apex-pkg
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database or workspace initialization error
    #[error("Failed to initialize: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// A named package, repository, release or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempted to create something that already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation conflicts with existing local state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Merkle root or signature did not match the downloaded content
    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),

    /// Local working copy is behind the remote repository
    #[error("{0}")]
    StaleWorkingCopy(String),

    /// Remote repository denied access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Version-control command failed for a reason other than "not found"
    #[error("SVN error: {0}")]
    Transport(String),

    /// A dependency could not be resolved or installed
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Key unlock, signing or certificate handling failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// HTTP download or API error
    #[error("Download error: {0}")]
    Download(String),

    /// Malformed manifest, property, version or timestamp
    #[error("Parse error: {0}")]
    Parse(String),

    /// Another process holds the package lock
    #[error("Package is locked: {0}")]
    Locked(String),
}

/// Result type alias using apex-pkg's Error type
pub type Result<T> = std::result::Result<T, Error>;
