// src/svn/export.rs

//! Exporting a release (or trunk) into a temporary directory

use crate::error::{Error, Result};
use crate::packages::manifest::{Manifest, VersionConstraint};
use crate::repository::RepoApi;
use crate::svn::client::{SvnRepo, TRUNK, tag_dir};
use crate::svn::transport::{NodeKind, Reply};
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

/// A package tree exported in SVN layout
///
/// The directory is removed when the export is dropped.
#[derive(Debug)]
pub struct Export {
    pub dir: TempDir,
    /// Resolved version (`dev` builds use the manifest version, or `dev`)
    pub version: String,
    /// Repository directory the tree came from (`trunk`, `tags/1.2.0`)
    pub source: String,
    pub files: usize,
}

impl Export {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load(self.path())
    }
}

pub struct SvnExport;

impl SvnExport {
    /// Newest release by semver order
    pub fn latest(svn: &mut SvnRepo) -> Result<String> {
        match svn.releases() {
            Reply::Ok(versions) => versions
                .last()
                .map(|v| v.to_string())
                .ok_or_else(|| Error::NotFound(format!("{} has no releases", svn.serial()))),
            Reply::NotFound(_) => Err(Error::NotFound(format!(
                "{} has no releases",
                svn.serial()
            ))),
            Reply::Failed(_) => Err(svn.failure("Unable to list releases")),
        }
    }

    /// Resolve a version request to `(version, repository dir)`
    pub fn resolve(svn: &mut SvnRepo, requested: &VersionConstraint) -> Result<(String, String)> {
        match requested {
            VersionConstraint::Dev => Ok(("dev".to_string(), TRUNK.to_string())),
            VersionConstraint::Latest => {
                let version = Self::latest(svn)?;
                let dir = tag_dir(&version);
                Ok((version, dir))
            }
            VersionConstraint::Exact(version) => {
                let dir = tag_dir(version);
                match svn.info(&dir) {
                    Reply::Ok(NodeKind::Dir) => Ok((version.clone(), dir)),
                    Reply::Ok(NodeKind::File) | Reply::NotFound(_) => Err(Error::NotFound(
                        format!("{} has no release {}", svn.serial(), version),
                    )),
                    Reply::Failed(_) => {
                        Err(svn.failure(&format!("Unable to look up release {}", version)))
                    }
                }
            }
        }
    }

    /// Export the requested version into a fresh temporary directory
    ///
    /// Commercial packages (`license_id` given) are downloaded through the
    /// repository API instead of exported from SVN.
    pub fn process(
        svn: &mut SvnRepo,
        api: &dyn RepoApi,
        requested: &VersionConstraint,
        license_id: Option<&str>,
    ) -> Result<Export> {
        let serial = svn.serial();
        let (mut version, source) = Self::resolve(svn, requested)?;
        let dir = tempfile::Builder::new().prefix("apex-export-").tempdir()?;

        let files = match license_id {
            Some(license_id) => {
                debug!("Downloading licensed {} {}", serial, version);
                api.download_licensed(&serial, &version, license_id, dir.path())?
            }
            None => match svn.export(&source, dir.path()) {
                Reply::Ok(files) => files,
                _ => {
                    return Err(svn.failure(&format!("Unable to export {} {}", serial, version)));
                }
            },
        };

        if *requested == VersionConstraint::Dev {
            if let Some(manifest_version) = Manifest::load(dir.path())?.package.version {
                version = manifest_version;
            }
        }

        info!("Exported {} {} ({} files)", serial, version, files);
        Ok(Export {
            dir,
            version,
            source,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::models::Repository;
    use crate::repository::OfflineApi;
    use crate::svn::memory::MemoryBackend;
    use std::fs;
    use std::sync::Arc;

    fn repo(backend: Arc<MemoryBackend>) -> SvnRepo {
        let mut config = Config::new("/srv/app");
        config.ssh_key = None;
        let repository = Repository::new("main".to_string(), "repo.test".to_string());
        SvnRepo::new(backend, repository, "jsmith", "shop", &config)
    }

    fn publish(backend: &MemoryBackend, dir: &str, content: &str) {
        backend.put_file(
            &format!("svn://repo.test/jsmith/shop/{}/src/Cart.php", dir),
            content.as_bytes(),
        );
    }

    #[test]
    fn test_latest_release_is_exported() {
        let backend = Arc::new(MemoryBackend::new());
        for version in ["1.0.0", "1.10.0", "1.2.0"] {
            publish(&backend, &tag_dir(version), version);
        }
        let mut svn = repo(backend);

        let export = SvnExport::process(&mut svn, &OfflineApi::new(), &VersionConstraint::Latest, None)
            .unwrap();
        assert_eq!(export.version, "1.10.0");
        assert_eq!(export.source, "tags/1.10.0");
        assert_eq!(
            fs::read_to_string(export.path().join("src/Cart.php")).unwrap(),
            "1.10.0"
        );
    }

    #[test]
    fn test_dev_uses_trunk_and_manifest_version() {
        let backend = Arc::new(MemoryBackend::new());
        publish(&backend, TRUNK, "wip");
        backend.put_file(
            "svn://repo.test/jsmith/shop/trunk/etc/package.toml",
            b"[package]\nversion = \"2.0.0-beta.1\"\n",
        );
        let mut svn = repo(backend);

        let export =
            SvnExport::process(&mut svn, &OfflineApi::new(), &VersionConstraint::Dev, None).unwrap();
        assert_eq!(export.source, "trunk");
        assert_eq!(export.version, "2.0.0-beta.1");
    }

    #[test]
    fn test_missing_release() {
        let backend = Arc::new(MemoryBackend::new());
        publish(&backend, &tag_dir("1.0.0"), "one");
        let mut svn = repo(backend.clone());

        let missing = VersionConstraint::Exact("3.0.0".to_string());
        assert!(matches!(
            SvnExport::process(&mut svn, &OfflineApi::new(), &missing, None),
            Err(Error::NotFound(_))
        ));

        let empty = Arc::new(MemoryBackend::new());
        let mut svn = repo(empty);
        assert!(matches!(SvnExport::latest(&mut svn), Err(Error::NotFound(_))));
    }
}
