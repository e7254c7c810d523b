// src/svn/lock.rs

//! Per-package lock file
//!
//! Checkout, commit and upgrade hold `.apex/svn/{alias}.lock` for their whole
//! run. The file is created with `create_new`, so a second process touching
//! the same package fails fast instead of interleaving.

use crate::config::Config;
use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PackageLock {
    path: PathBuf,
}

impl PackageLock {
    pub fn acquire(config: &Config, alias: &str) -> Result<Self> {
        let dir = config.svn_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.lock", alias));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(Error::Locked(format!(
                    "{} is in use by process {} (remove {} if that process is gone)",
                    alias,
                    holder.trim(),
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        debug!("Locked {}", alias);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Unable to remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());

        let lock = PackageLock::acquire(&config, "shop").unwrap();
        assert!(lock.path().exists());
        assert!(matches!(
            PackageLock::acquire(&config, "shop"),
            Err(Error::Locked(_))
        ));
        assert!(PackageLock::acquire(&config, "users").is_ok());

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
        assert!(PackageLock::acquire(&config, "shop").is_ok());
    }
}
