// src/svn/transport.rs

//! Version-control backend abstraction
//!
//! Backends never return `Err` for a failed command. Each call yields a
//! [`Reply`] so orchestration code can decide whether a failure means
//! "doesn't exist yet", "retry with authentication" or "give up".

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// svn error codes meaning the path, URL or property does not exist
const NOT_FOUND_CODES: [&str; 9] = [
    "E160013", "W160013", "E170000", "E200009", "E200017", "W200017", "E155010", "E195012",
    "E200005",
];

/// svn error codes meaning the request needs (different) credentials
const AUTH_CODES: [&str; 4] = ["E170001", "E215004", "E210002", "E170013"];

/// Result of one backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Ok(T),
    /// Target path, URL or property does not exist
    NotFound(TransportError),
    Failed(TransportError),
}

impl<T> Reply<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Reply::Ok(_) => None,
            Reply::NotFound(err) | Reply::Failed(err) => Some(err),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Reply<U> {
        match self {
            Reply::Ok(value) => Reply::Ok(f(value)),
            Reply::NotFound(err) => Reply::NotFound(err),
            Reply::Failed(err) => Reply::Failed(err),
        }
    }

    /// Build a failure reply, classifying by the codes found in `stderr`
    pub fn from_error(err: TransportError) -> Self {
        match err.class() {
            ErrorClass::NotFound => Reply::NotFound(err),
            _ => Reply::Failed(err),
        }
    }
}

/// Broad category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Unauthorized,
    Unknown,
}

/// Captured failure of a backend command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportError {
    pub codes: Vec<String>,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl TransportError {
    pub fn new(stderr: impl Into<String>, exit_code: Option<i32>) -> Self {
        let stderr = stderr.into();
        Self {
            codes: parse_error_codes(&stderr),
            stderr,
            exit_code,
        }
    }

    /// Failure that did not come from svn itself (spawn error, timeout)
    pub fn local(message: impl Into<String>) -> Self {
        Self::new(message, None)
    }

    pub fn class(&self) -> ErrorClass {
        if self.codes.iter().any(|c| NOT_FOUND_CODES.contains(&c.as_str())) {
            ErrorClass::NotFound
        } else if self.codes.iter().any(|c| AUTH_CODES.contains(&c.as_str())) {
            ErrorClass::Unauthorized
        } else {
            ErrorClass::Unknown
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            write!(f, "command failed with exit code {:?}", self.exit_code)
        } else {
            write!(f, "{}", stderr)
        }
    }
}

fn error_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([WE]\d{6})\b").expect("valid regex"))
}

/// Extract embedded `<W|E><digits>` codes from svn stderr, in order, deduplicated
pub fn parse_error_codes(stderr: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for cap in error_code_regex().captures_iter(stderr) {
        let code = cap[1].to_string();
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

/// One line of `svn status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// First status column: `?` unversioned, `!` missing, `M`, `A`, `D`...
    pub code: char,
    /// Path relative to the working copy root
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffItem {
    Added,
    Modified,
    Deleted,
}

/// One entry of `svn diff --summarize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// Path relative to the compared roots
    pub path: String,
    pub item: DiffItem,
    /// Node kind when the backend reports it
    pub kind: Option<NodeKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitMessage {
    Text(String),
    File(PathBuf),
}

/// Operations the package core needs from a version-control backend
///
/// `target` arguments accept either a repository URL or a working-copy path.
pub trait VcsBackend: Send + Sync {
    fn info(&self, target: &str) -> Reply<NodeKind>;

    /// Names of the direct children of a directory URL, without trailing `/`
    fn list(&self, url: &str) -> Reply<Vec<String>>;

    fn cat(&self, url: &str) -> Reply<Vec<u8>>;

    /// Export a clean tree (no working-copy metadata); returns the file count
    fn export(&self, url: &str, dest: &Path) -> Reply<usize>;

    /// Check out a working copy; returns the number of files and directories added
    fn checkout(&self, url: &str, dest: &Path) -> Reply<usize>;

    fn status(&self, wc: &Path) -> Reply<Vec<StatusEntry>>;

    fn add(&self, wc: &Path, paths: &[String]) -> Reply<()>;

    fn remove(&self, wc: &Path, paths: &[String]) -> Reply<()>;

    /// Commit a working copy; returns the new revision
    fn commit(&self, wc: &Path, message: &CommitMessage) -> Reply<u64>;

    /// Read a property; `NotFound` when unset
    fn propget(&self, name: &str, target: &str) -> Reply<String>;

    /// Set a property on the root of a working copy
    fn propset(&self, name: &str, value: &str, wc: &Path) -> Reply<()>;

    /// Set a property directly on a repository URL, creating a revision
    fn propset_remote(&self, name: &str, value: &str, url: &str, message: &str) -> Reply<u64>;

    /// Create a directory (and missing parents) directly in the repository
    fn mkdir(&self, url: &str, message: &str) -> Reply<u64>;

    /// Server-side copy, used to cut release tags
    fn copy(&self, from_url: &str, to_url: &str, message: &str) -> Reply<u64>;

    fn diff_summarize(&self, old_url: &str, new_url: &str) -> Reply<Vec<DiffEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_codes() {
        let stderr = "svn: E170000: URL 'svn://x/y' doesn't exist\nsvn: W160013: path not found\nsvn: E170000: again";
        assert_eq!(parse_error_codes(stderr), vec!["E170000", "W160013"]);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            TransportError::new("svn: E160013: '/trunk' path not found", Some(1)).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            TransportError::new("svn: E170001: Authorization failed", Some(1)).class(),
            ErrorClass::Unauthorized
        );
        assert_eq!(
            TransportError::new("svn: E999999: something odd", Some(1)).class(),
            ErrorClass::Unknown
        );
        assert_eq!(TransportError::local("spawn failed").class(), ErrorClass::Unknown);
    }

    #[test]
    fn test_reply_from_error() {
        let reply: Reply<()> = Reply::from_error(TransportError::new("svn: W200017: Property 'x' not found", Some(1)));
        assert!(matches!(reply, Reply::NotFound(_)));

        let reply: Reply<()> = Reply::from_error(TransportError::new("boom", Some(1)));
        assert!(matches!(reply, Reply::Failed(_)));
    }
}
