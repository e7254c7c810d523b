// src/svn/changelog.rs

//! File-level changes between two release tags

use crate::error::{Error, Result};
use crate::svn::client::{SvnRepo, tag_dir};
use crate::svn::export::SvnExport;
use crate::svn::transport::{DiffItem, NodeKind, Reply};
use tracing::debug;

/// SVN-relative paths changed between two releases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelog {
    pub from: String,
    pub to: String,
    /// Added or modified files
    pub updated: Vec<String>,
    /// Deleted files and directories
    pub deleted: Vec<String>,
}

impl Changelog {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub struct SvnChangelog;

impl SvnChangelog {
    fn require_tag(svn: &mut SvnRepo, version: &str) -> Result<()> {
        match svn.info(&tag_dir(version)) {
            Reply::Ok(NodeKind::Dir) => Ok(()),
            Reply::Ok(NodeKind::File) | Reply::NotFound(_) => Err(Error::NotFound(format!(
                "{} has no release {}",
                svn.serial(),
                version
            ))),
            Reply::Failed(_) => Err(svn.failure(&format!("Unable to look up release {}", version))),
        }
    }

    /// Changes from `old_version` to `new_version` (latest release when None)
    pub fn get(svn: &mut SvnRepo, old_version: &str, new_version: Option<&str>) -> Result<Changelog> {
        let new_version = match new_version {
            Some(v) => v.to_string(),
            None => SvnExport::latest(svn)?,
        };
        Self::require_tag(svn, old_version)?;
        Self::require_tag(svn, &new_version)?;

        let old_dir = tag_dir(old_version);
        let new_dir = tag_dir(&new_version);
        let entries = match svn.diff_summarize(&old_dir, &new_dir) {
            Reply::Ok(entries) => entries,
            _ => {
                return Err(svn.failure(&format!(
                    "Unable to diff {} against {}",
                    old_version, new_version
                )));
            }
        };

        let mut changelog = Changelog {
            from: old_version.to_string(),
            to: new_version.clone(),
            ..Default::default()
        };

        for entry in entries {
            match entry.item {
                DiffItem::Deleted => changelog.deleted.push(entry.path),
                DiffItem::Added | DiffItem::Modified => {
                    let kind = match entry.kind {
                        Some(kind) => kind,
                        None => match svn.info(&format!("{}/{}", new_dir, entry.path)) {
                            Reply::Ok(kind) => kind,
                            _ => {
                                return Err(svn.failure(&format!(
                                    "Unable to inspect {} in {}",
                                    entry.path, new_version
                                )));
                            }
                        },
                    };
                    if kind == NodeKind::File {
                        changelog.updated.push(entry.path);
                    }
                }
            }
        }

        changelog.updated.sort();
        changelog.updated.dedup();
        changelog.deleted.sort();
        changelog.deleted.dedup();

        debug!(
            "{} {} -> {}: {} updated, {} deleted",
            svn.serial(),
            old_version,
            new_version,
            changelog.updated.len(),
            changelog.deleted.len()
        );
        Ok(changelog)
    }
}
