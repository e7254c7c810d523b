// src/config.rs

//! Runtime configuration
//!
//! Settings come from command-line flags and the environment. The resulting
//! `Config` is built once in `main` and passed by reference through every
//! install, upgrade, commit and checkout call.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ceiling on a single svn invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bound on recursive dependency installation
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 16;

/// Whether this deployment owns the database schema or replicates it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Master,
    Slave,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; `.apex/` lives directly under it
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub svn_bin: String,
    pub command_timeout: Duration,
    pub ssh_key: Option<PathBuf>,
    pub ssh_password: Option<String>,
    pub signing_password: Option<String>,
    pub api_key: Option<String>,
    pub role: InstanceRole,
    /// Verify merkle root and signature of upgrade diffs
    pub verify_upgrades: bool,
    pub max_dependency_depth: usize,
}

impl Config {
    /// Create a configuration rooted at `root` with default settings
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let db_path = root.join(".apex").join("apex.db");
        Self {
            root,
            db_path,
            svn_bin: "svn".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            ssh_key: default_ssh_key(),
            ssh_password: None,
            signing_password: None,
            api_key: None,
            role: InstanceRole::Master,
            verify_upgrades: true,
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
        }
    }

    /// Pull secrets from `APEX_SSH_PASSWORD`, `APEX_SIGNING_PASSWORD` and `APEX_API_KEY`
    pub fn with_env_secrets(mut self) -> Self {
        if let Ok(pw) = std::env::var("APEX_SSH_PASSWORD") {
            self.ssh_password = Some(pw);
        }
        if let Ok(pw) = std::env::var("APEX_SIGNING_PASSWORD") {
            self.signing_password = Some(pw);
        }
        if let Ok(key) = std::env::var("APEX_API_KEY") {
            self.api_key = Some(key);
        }
        self
    }

    pub fn is_slave(&self) -> bool {
        self.role == InstanceRole::Slave
    }

    pub fn apex_dir(&self) -> PathBuf {
        self.root.join(".apex")
    }

    /// Directory holding every package working copy
    pub fn svn_dir(&self) -> PathBuf {
        self.apex_dir().join("svn")
    }

    /// Working copy of a single package
    pub fn working_copy(&self, alias: &str) -> PathBuf {
        self.svn_dir().join(alias)
    }

    pub fn upgrades_dir(&self) -> PathBuf {
        self.apex_dir().join("upgrades")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.apex_dir().join("certs")
    }

    pub fn db_path_str(&self) -> String {
        self.db_path.to_string_lossy().to_string()
    }

    /// Resolve a path relative to the project root
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }
}

/// Key file names tried in `~/.ssh`, in order
const DEFAULT_SSH_KEYS: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// The first standard key that exists; None leaves authentication to the agent
fn default_ssh_key() -> Option<PathBuf> {
    std::env::var_os("HOME").and_then(|home| find_ssh_key(&PathBuf::from(home).join(".ssh")))
}

fn find_ssh_key(ssh_dir: &Path) -> Option<PathBuf> {
    DEFAULT_SSH_KEYS
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_under_root() {
        let config = Config::new("/srv/app");
        assert_eq!(config.db_path, PathBuf::from("/srv/app/.apex/apex.db"));
        assert_eq!(
            config.working_copy("shop"),
            PathBuf::from("/srv/app/.apex/svn/shop")
        );
        assert_eq!(config.upgrades_dir(), PathBuf::from("/srv/app/.apex/upgrades"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::new("/srv/app");
        assert!(config.verify_upgrades);
        assert!(!config.is_slave());
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(config.max_dependency_depth, DEFAULT_MAX_DEPENDENCY_DEPTH);
    }

    #[test]
    fn test_ssh_key_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_ssh_key(dir.path()), None);

        std::fs::write(dir.path().join("id_rsa"), "rsa").unwrap();
        assert_eq!(find_ssh_key(dir.path()), Some(dir.path().join("id_rsa")));

        std::fs::write(dir.path().join("id_ed25519"), "ed").unwrap();
        assert_eq!(find_ssh_key(dir.path()), Some(dir.path().join("id_ed25519")));
    }
}
