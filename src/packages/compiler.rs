// src/packages/compiler.rs

//! Moving package files between the project layout and the SVN layout
//!
//! `compile` mirrors a package's project files into its working copy before a
//! commit; `materialize` writes an exported or checked-out tree into the
//! project.

use crate::error::{Error, Result};
use crate::integrity::inventory::{project_files, walk_files};
use crate::packages::layout::{EXTERNAL_DIR, PathConverter};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Files touched by a compile
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompileReport {
    pub written: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// A file written into the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub svn_path: String,
    pub local_path: String,
}

impl Materialized {
    /// Whether this file lives outside the package's managed directories
    pub fn is_external(&self) -> bool {
        self.svn_path.starts_with(&format!("{}/", EXTERNAL_DIR))
    }
}

fn copy_if_changed(from: &Path, to: &Path) -> Result<bool> {
    let content = fs::read(from)?;
    if to.is_file() && fs::read(to)? == content {
        return Ok(false);
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(to, content)?;
    Ok(true)
}

/// Mirror the package's project files into `wc` (SVN layout)
///
/// Files in the working copy with no project counterpart are deleted; VCS
/// metadata is left alone.
pub fn compile(
    root: &Path,
    converter: &PathConverter,
    external_files: &[String],
    wc: &Path,
) -> Result<CompileReport> {
    let mut report = CompileReport::default();
    let mut wanted = BTreeSet::new();

    for (svn_path, abs) in project_files(root, converter, external_files)? {
        if copy_if_changed(&abs, &wc.join(&svn_path))? {
            report.written += 1;
        } else {
            report.unchanged += 1;
        }
        wanted.insert(svn_path);
    }

    for (rel, abs) in walk_files(wc)? {
        if !wanted.contains(&rel) {
            fs::remove_file(&abs)?;
            report.removed += 1;
        }
    }

    debug!(
        "Compiled {}: {} written, {} removed, {} unchanged",
        converter.alias(),
        report.written,
        report.removed,
        report.unchanged
    );
    Ok(report)
}

/// Write every file of an SVN-layout tree into the project
pub fn materialize(source: &Path, root: &Path, converter: &PathConverter) -> Result<Vec<Materialized>> {
    let mut written = Vec::new();
    materialize_into(source, root, converter, &mut written)?;
    Ok(written)
}

/// Like [`materialize`], appending to `written` as each file lands
///
/// On error `written` still lists every file copied so far.
pub fn materialize_into(
    source: &Path,
    root: &Path,
    converter: &PathConverter,
    written: &mut Vec<Materialized>,
) -> Result<()> {
    let start = written.len();
    for (svn_path, abs) in walk_files(source)? {
        let Some(local_path) = converter.to_local(&svn_path) else {
            warn!(
                "Skipping {} of {}: outside the package layout",
                svn_path,
                converter.alias()
            );
            continue;
        };
        install_file(&abs, root, &local_path)?;
        written.push(Materialized {
            svn_path,
            local_path,
        });
    }

    debug!("Materialized {} files of {}", written.len() - start, converter.alias());
    Ok(())
}

/// Copy one file to a project-relative destination
pub fn install_file(source: &Path, root: &Path, local_path: &str) -> Result<()> {
    let dest = root.join(local_path);
    if !dest.starts_with(root) {
        return Err(Error::Conflict(format!("Refusing to write outside the project: {}", local_path)));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, &dest)?;
    Ok(())
}

/// Delete a project-relative file and any directories it leaves empty
pub fn remove_file(root: &Path, local_path: &str) -> Result<bool> {
    let path = root.join(local_path);
    if !path.is_file() {
        return Ok(false);
    }
    fs::remove_file(&path)?;

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || fs::read_dir(current)?.next().is_some() {
            break;
        }
        fs::remove_dir(current)?;
        dir = current.parent();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_compile_mirrors_project() {
        let root = tempfile::tempdir().unwrap();
        let wc = tempfile::tempdir().unwrap();
        let conv = PathConverter::new("shop");

        write(root.path(), "src/Shop/Cart.php", "cart");
        write(root.path(), "views/shop/cart.html", "<b>");
        write(root.path(), "public/shop.js", "js");
        write(wc.path(), "src/Old.php", "old");
        write(wc.path(), "views/cart.html", "<b>");
        write(wc.path(), ".svn/wc.db", "meta");

        let report = compile(root.path(), &conv, &["public/shop.js".to_string()], wc.path()).unwrap();
        assert_eq!(report, CompileReport { written: 2, removed: 1, unchanged: 1 });

        assert_eq!(fs::read_to_string(wc.path().join("src/Cart.php")).unwrap(), "cart");
        assert_eq!(fs::read_to_string(wc.path().join("ext/public/shop.js")).unwrap(), "js");
        assert!(!wc.path().join("src/Old.php").exists());
        assert!(wc.path().join(".svn/wc.db").exists());
    }

    #[test]
    fn test_materialize_maps_layout() {
        let export = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        write(export.path(), "src/Cart.php", "cart");
        write(export.path(), "ext/public/shop.js", "js");
        write(export.path(), "README.md", "skipped");

        let written = materialize(export.path(), root.path(), &PathConverter::new("shop")).unwrap();
        assert_eq!(written.len(), 2);
        assert!(written.iter().any(|m| m.is_external() && m.local_path == "public/shop.js"));
        assert_eq!(
            fs::read_to_string(root.path().join("src/Shop/Cart.php")).unwrap(),
            "cart"
        );
        assert!(!root.path().join("README.md").exists());
    }

    #[test]
    fn test_remove_file_prunes_empty_dirs() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "src/Shop/Models/Cart.php", "cart");
        write(root.path(), "src/Shop/Keep.php", "keep");

        assert!(remove_file(root.path(), "src/Shop/Models/Cart.php").unwrap());
        assert!(!root.path().join("src/Shop/Models").exists());
        assert!(root.path().join("src/Shop/Keep.php").exists());
        assert!(!remove_file(root.path(), "src/Shop/Models/Cart.php").unwrap());
    }
}
