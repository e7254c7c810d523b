// src/svn/client.rs

//! Package-scoped SVN client
//!
//! `SvnRepo` binds a backend to one package on one repository. It builds
//! the protocol URL for each call, falls back from anonymous to SSH access
//! when a public read fails, and keeps the last failure in `error_output` /
//! `error_codes` instead of returning an error.

use crate::config::Config;
use crate::db::models::{LocalPackage, Repository};
use crate::error::{Error, Result};
use crate::svn::ssh_agent::SshAgent;
use crate::svn::transport::{CommitMessage, DiffEntry, NodeKind, Reply, StatusEntry, VcsBackend};
use rusqlite::Connection;
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TRUNK: &str = "trunk";
pub const TAGS: &str = "tags";
pub const BRANCHES: &str = "branches";

/// Directory of a release tag
pub fn tag_dir(version: &str) -> String {
    format!("{}/{}", TAGS, version)
}

/// How the repository is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// `file://`, a repository on this machine
    Local,
    /// `svn://`, anonymous
    Public,
    /// `svn+ssh://`, authenticated
    Ssh,
}

pub struct SvnRepo {
    backend: Arc<dyn VcsBackend>,
    repository: Repository,
    author: String,
    alias: String,
    mode: AccessMode,
    working_copy: PathBuf,
    agent: Option<SshAgent>,
    agent_ready: bool,
    error_output: String,
    error_codes: Vec<String>,
}

impl SvnRepo {
    pub fn new(
        backend: Arc<dyn VcsBackend>,
        repository: Repository,
        author: &str,
        alias: &str,
        config: &Config,
    ) -> Self {
        let mode = if repository.is_local() {
            AccessMode::Local
        } else {
            AccessMode::Public
        };
        let agent = config
            .ssh_key
            .as_ref()
            .map(|key| SshAgent::new(key, config.ssh_password.clone(), config.command_timeout));

        Self {
            backend,
            repository,
            author: author.to_string(),
            alias: alias.to_string(),
            mode,
            working_copy: config.working_copy(alias),
            agent,
            agent_ready: false,
            error_output: String::new(),
            error_codes: Vec::new(),
        }
    }

    /// Client for an installed or checked-out package
    pub fn for_package(
        backend: Arc<dyn VcsBackend>,
        conn: &Connection,
        package: &LocalPackage,
        config: &Config,
    ) -> Result<Self> {
        let repository = Repository::get(conn, package.repo_alias())?;
        Ok(Self::new(backend, repository, package.author(), &package.alias, config))
    }

    pub fn backend(&self) -> Arc<dyn VcsBackend> {
        Arc::clone(&self.backend)
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// `author/alias`
    pub fn serial(&self) -> String {
        format!("{}/{}", self.author, self.alias)
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn working_copy(&self) -> &Path {
        &self.working_copy
    }

    /// Switch to authenticated access for everything that follows
    pub fn use_ssh(&mut self) -> Result<()> {
        if self.mode == AccessMode::Local {
            return Ok(());
        }
        self.mode = AccessMode::Ssh;
        self.prepare_agent()
    }

    fn prepare_agent(&mut self) -> Result<()> {
        if self.agent_ready {
            return Ok(());
        }
        if let Some(agent) = &self.agent {
            agent.ensure_loaded()?;
        }
        self.agent_ready = true;
        Ok(())
    }

    /// Repository URL of the package root in the current access mode
    pub fn base_url(&self) -> String {
        match self.mode {
            AccessMode::Local => format!(
                "file://{}/{}",
                self.repository.local_path.as_deref().unwrap_or("").trim_end_matches('/'),
                self.serial()
            ),
            AccessMode::Ssh => format!("svn+ssh://svn@{}/{}", self.repository.host, self.serial()),
            AccessMode::Public => format!("svn://{}/{}", self.repository.host, self.serial()),
        }
    }

    /// URL of `dir` (`trunk`, `tags/1.0.0`, `trunk/etc/package.toml`...)
    pub fn url(&self, dir: &str) -> String {
        let dir = dir.trim_matches('/');
        if dir.is_empty() {
            self.base_url()
        } else {
            format!("{}/{}", self.base_url(), dir)
        }
    }

    pub fn error_output(&self) -> &str {
        &self.error_output
    }

    pub fn error_codes(&self) -> &[String] {
        &self.error_codes
    }

    fn record<T>(&mut self, reply: &Reply<T>) {
        match reply.error() {
            Some(err) => {
                self.error_output = err.stderr.clone();
                self.error_codes = err.codes.clone();
            }
            None => {
                self.error_output.clear();
                self.error_codes.clear();
            }
        }
    }

    /// Run `op` against the URL of `dir`, retrying over SSH if a public read fails
    fn remote<T>(&mut self, dir: &str, op: impl Fn(&dyn VcsBackend, &str) -> Reply<T>) -> Reply<T> {
        let reply = op(self.backend.as_ref(), &self.url(dir));

        let reply = match reply {
            Reply::Failed(err) if self.mode == AccessMode::Public => {
                debug!("Public access to {} failed, retrying over SSH", self.serial());
                match self.use_ssh() {
                    Ok(()) => op(self.backend.as_ref(), &self.url(dir)),
                    Err(e) => {
                        warn!("Unable to prepare SSH access: {}", e);
                        self.mode = AccessMode::Public;
                        Reply::Failed(err)
                    }
                }
            }
            other => other,
        };

        self.record(&reply);
        reply
    }

    fn local<T>(&mut self, op: impl FnOnce(&dyn VcsBackend, &Path) -> Reply<T>) -> Reply<T> {
        let reply = op(self.backend.as_ref(), &self.working_copy);
        self.record(&reply);
        reply
    }

    pub fn info(&mut self, dir: &str) -> Reply<NodeKind> {
        self.remote(dir, |b, url| b.info(url))
    }

    pub fn list(&mut self, dir: &str) -> Reply<Vec<String>> {
        self.remote(dir, |b, url| b.list(url))
    }

    pub fn cat(&mut self, path: &str) -> Reply<Vec<u8>> {
        self.remote(path, |b, url| b.cat(url))
    }

    pub fn export(&mut self, dir: &str, dest: &Path) -> Reply<usize> {
        self.remote(dir, |b, url| b.export(url, dest))
    }

    pub fn checkout(&mut self, dir: &str) -> Reply<usize> {
        let dest = self.working_copy.clone();
        self.remote(dir, |b, url| b.checkout(url, &dest))
    }

    pub fn propget(&mut self, name: &str, dir: &str) -> Reply<String> {
        self.remote(dir, |b, url| b.propget(name, url))
    }

    /// Property value on `dir`, None when the property is unset
    pub fn prop(&mut self, name: &str, dir: &str) -> Result<Option<String>> {
        match self.propget(name, dir) {
            Reply::Ok(value) => Ok(Some(value.trim().to_string())),
            Reply::NotFound(_) => Ok(None),
            Reply::Failed(_) => Err(self.failure(&format!("Unable to read property {} of {}", name, dir))),
        }
    }

    pub fn propset_remote(&mut self, name: &str, value: &str, dir: &str, message: &str) -> Reply<u64> {
        self.remote(dir, |b, url| b.propset_remote(name, value, url, message))
    }

    pub fn mkdir(&mut self, dir: &str, message: &str) -> Reply<u64> {
        self.remote(dir, |b, url| b.mkdir(url, message))
    }

    /// Server-side copy between two directories of this package
    pub fn copy(&mut self, from_dir: &str, to_dir: &str, message: &str) -> Reply<u64> {
        self.remote(from_dir, |b, url| b.copy(url, &sibling(url, from_dir, to_dir), message))
    }

    pub fn diff_summarize(&mut self, old_dir: &str, new_dir: &str) -> Reply<Vec<DiffEntry>> {
        self.remote(old_dir, |b, url| b.diff_summarize(url, &sibling(url, old_dir, new_dir)))
    }

    pub fn status(&mut self) -> Reply<Vec<StatusEntry>> {
        self.local(|b, wc| b.status(wc))
    }

    pub fn add(&mut self, paths: &[String]) -> Reply<()> {
        self.local(|b, wc| b.add(wc, paths))
    }

    pub fn remove(&mut self, paths: &[String]) -> Reply<()> {
        self.local(|b, wc| b.remove(wc, paths))
    }

    pub fn propset(&mut self, name: &str, value: &str) -> Reply<()> {
        self.local(|b, wc| b.propset(name, value, wc))
    }

    pub fn commit(&mut self, message: &CommitMessage) -> Reply<u64> {
        self.local(|b, wc| b.commit(wc, message))
    }

    /// Published releases in ascending semver order; non-semver tags are skipped
    pub fn releases(&mut self) -> Reply<Vec<Version>> {
        self.list(TAGS).map(|names| {
            let mut versions: Vec<Version> = names
                .iter()
                .filter_map(|name| Version::parse(name).ok())
                .collect();
            versions.sort();
            versions
        })
    }

    /// Whether the package's repository exists at all
    pub fn exists(&mut self) -> bool {
        matches!(self.info(""), Reply::Ok(_))
    }

    /// Turn the last recorded failure into an error mentioning `context`
    pub fn failure(&self, context: &str) -> Error {
        let detail = self.error_output.trim();
        if detail.is_empty() {
            Error::Transport(format!("{} ({})", context, self.serial()))
        } else {
            Error::Transport(format!("{} ({}): {}", context, self.serial(), detail))
        }
    }

    /// Create `trunk`, `tags` and `branches` for a new package
    pub fn create_layout(&mut self) -> Result<()> {
        for dir in [TRUNK, TAGS, BRANCHES] {
            if let Reply::Failed(_) = self.mkdir(dir, &format!("Create {} for {}", dir, self.serial())) {
                if self.error_codes.iter().any(|c| c == "E160020") {
                    continue;
                }
                return Err(self.failure(&format!("Unable to create {}", dir)));
            }
        }
        info!("Created repository layout for {}", self.serial());
        Ok(())
    }
}

impl std::fmt::Debug for SvnRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvnRepo")
            .field("serial", &self.serial())
            .field("repository", &self.repository.alias)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Swap the trailing `dir` of `url` for `other`, keeping scheme and host
fn sibling(url: &str, dir: &str, other: &str) -> String {
    let dir = dir.trim_matches('/');
    let root = url.strip_suffix(dir).unwrap_or(url).trim_end_matches('/');
    format!("{}/{}", root, other.trim_matches('/'))
}
