// src/integrity/inventory.rs

//! File-hash inventories
//!
//! An inventory maps every tracked SVN-relative path of a package to the
//! SHA-256 of its contents. The map is ordered, so two inventories built from
//! the same files compare equal regardless of directory iteration order.

use crate::error::{Error, Result};
use crate::packages::layout::{EXTERNAL_DIR, MANAGED_DIRS, PathConverter, normalize_path};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory names never included in an inventory
const EXCLUDED_DIRS: [&str; 5] = [".svn", ".git", ".apex", "vendor", "node_modules"];

/// File names never included in an inventory
const EXCLUDED_FILES: [&str; 3] = [".env", ".DS_Store", "Thumbs.db"];

/// Mapping of SVN-relative path to content hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub files: BTreeMap<String, String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file, normalizing its path
    pub fn insert(&mut self, path: &str, hash: String) {
        self.files.insert(normalize_path(path), hash);
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(&normalize_path(path))
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.files.iter()
    }

    /// Decode the `inventory` property value (`{"files": {path: hash}}`)
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Parse(format!("Invalid inventory property: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Hex SHA-256 of a byte slice
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of a file's contents
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether a relative path falls under VCS metadata, vendored code or env files
pub fn is_excluded(rel: &Path) -> bool {
    rel.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        EXCLUDED_DIRS.contains(&&*name)
    }) || rel
        .file_name()
        .map(|n| EXCLUDED_FILES.contains(&&*n.to_string_lossy()))
        .unwrap_or(false)
}

/// Collect `(relative path, absolute path)` for every file under `dir`
///
/// An unreadable entry fails the walk rather than leaving a hole in the result.
pub fn walk_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(dir).follow_links(false).into_iter().filter_entry(|entry| {
        entry
            .path()
            .strip_prefix(dir)
            .map(|rel| !is_excluded(rel))
            .unwrap_or(true)
    });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            files.push((normalize_path(&rel.to_string_lossy()), entry.path().to_path_buf()));
        }
    }
    Ok(files)
}

fn hash_all(entries: Vec<(String, PathBuf)>) -> Result<Inventory> {
    let hashed = entries
        .par_iter()
        .map(|(rel, abs)| hash_file(abs).map(|hash| (rel.clone(), hash)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Inventory {
        files: hashed.into_iter().collect(),
    })
}

/// Builds inventories from package trees on disk
pub struct InventoryBuilder;

impl InventoryBuilder {
    /// Inventory of a directory already in SVN layout (export, working copy)
    pub fn from_tree(dir: &Path) -> Result<Inventory> {
        let entries = walk_files(dir)?;
        debug!("Hashing {} files under {}", entries.len(), dir.display());
        hash_all(entries)
    }

    /// Inventory of a package as laid out inside a project
    ///
    /// `external_files` are project-relative paths registered with the
    /// package; they are tracked under `ext/`.
    pub fn from_project(
        root: &Path,
        converter: &PathConverter,
        external_files: &[String],
    ) -> Result<Inventory> {
        let entries = project_files(root, converter, external_files)?;
        debug!(
            "Hashing {} files of package {}",
            entries.len(),
            converter.alias()
        );
        hash_all(entries)
    }
}

/// `(SVN-relative path, absolute path)` of every file a package owns in a project
pub fn project_files(
    root: &Path,
    converter: &PathConverter,
    external_files: &[String],
) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();

    for svn_dir in MANAGED_DIRS {
        let Some(local_dir) = converter.local_dir(svn_dir) else {
            continue;
        };
        for (rel, abs) in walk_files(&root.join(&local_dir))? {
            entries.push((format!("{}/{}", svn_dir, rel), abs));
        }
    }

    for external in external_files {
        let rel = normalize_path(external);
        let abs = root.join(&rel);
        if abs.is_file() && !is_excluded(Path::new(&rel)) {
            entries.push((format!("{}/{}", EXTERNAL_DIR, rel), abs));
        }
    }

    Ok(entries)
}
