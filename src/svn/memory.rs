// src/svn/memory.rs

//! In-process version-control backend
//!
//! Holds a whole repository in memory and keeps working copies on disk, so
//! checkout, commit, install and upgrade flows can run end to end without an
//! `svn` binary. Used by the test suite and by `file://` dry runs.

use crate::svn::transport::{
    CommitMessage, DiffEntry, DiffItem, NodeKind, Reply, StatusEntry, TransportError, VcsBackend,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use walkdir::WalkDir;

const WC_ADMIN_DIR: &str = ".svn";

#[derive(Debug, Default)]
struct WorkingCopy {
    /// Repository key the working copy was checked out from
    key: String,
    /// File contents as of the last checkout or commit
    base: BTreeMap<String, Vec<u8>>,
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
    pending_props: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    props: BTreeMap<String, BTreeMap<String, String>>,
    revision: u64,
    deny_anonymous: bool,
    working_copies: BTreeMap<PathBuf, WorkingCopy>,
    calls: Vec<String>,
}

/// Repository-relative key of a URL, or None for a local path
fn url_key(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let path = rest.split_once('/').map(|(_, p)| p).unwrap_or("");
    Some(path.trim_matches('/').to_string())
}

fn join_key(base: &str, rel: &str) -> String {
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", base, rel)
    }
}

fn not_found(what: &str) -> TransportError {
    TransportError::new(format!("svn: E170000: URL '{}' doesn't exist", what), Some(1))
}

fn failed(message: String) -> TransportError {
    TransportError::new(message, Some(1))
}

fn local_error(e: std::io::Error) -> TransportError {
    TransportError::local(e.to_string())
}

/// Files on disk under a working copy, keyed by relative path
fn disk_files(wc: &Path) -> std::io::Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(wc)
        .into_iter()
        .filter_entry(|e| e.file_name() != WC_ADMIN_DIR)
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(wc) {
            let rel = rel.to_string_lossy().replace('\\', "/");
            files.insert(rel, fs::read(entry.path())?);
        }
    }
    Ok(files)
}

impl MemoryState {
    fn is_dir(&self, key: &str) -> bool {
        if key.is_empty() || self.dirs.contains(key) {
            return true;
        }
        let prefix = format!("{}/", key);
        self.files.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|k| k.starts_with(&prefix))
    }

    fn files_under(&self, key: &str) -> BTreeMap<String, Vec<u8>> {
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        };
        self.files
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rel| (rel.to_string(), v.clone())))
            .collect()
    }

    fn dirs_under(&self, key: &str) -> BTreeSet<String> {
        let prefix = format!("{}/", key);
        let mut dirs: BTreeSet<String> = self
            .dirs
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(|s| s.to_string()))
            .collect();
        for rel in self.files_under(key).keys() {
            let mut parts: Vec<&str> = rel.split('/').collect();
            parts.pop();
            while !parts.is_empty() {
                dirs.insert(parts.join("/"));
                parts.pop();
            }
        }
        dirs
    }

    fn write_file(&mut self, key: String, content: Vec<u8>) {
        self.files.insert(key, content);
    }

    fn check_access(&self, url: &str) -> Result<(), TransportError> {
        if self.deny_anonymous && url.starts_with("svn://") {
            return Err(failed(format!(
                "svn: E170001: Authorization failed for '{}'",
                url
            )));
        }
        Ok(())
    }
}

/// In-memory [`VcsBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject anonymous `svn://` access, forcing callers onto `svn+ssh://`
    pub fn deny_anonymous(&self, deny: bool) {
        self.state().deny_anonymous = deny;
    }

    /// Place a file directly in the repository
    pub fn put_file(&self, url: &str, content: &[u8]) {
        if let Some(key) = url_key(url) {
            let mut state = self.state();
            state.write_file(key, content.to_vec());
            state.revision += 1;
        }
    }

    /// Set a property directly, without recording a call
    pub fn set_prop(&self, url: &str, name: &str, value: &str) {
        if let Some(key) = url_key(url) {
            self.state()
                .props
                .entry(key)
                .or_default()
                .insert(name.to_string(), value.to_string());
        }
    }

    pub fn file(&self, url: &str) -> Option<Vec<u8>> {
        let key = url_key(url)?;
        self.state().files.get(&key).cloned()
    }

    pub fn revision(&self) -> u64 {
        self.state().revision
    }

    /// Every backend call made so far, as `"{op} {target}"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls whose operation name is `op`
    pub fn count_calls(&self, op: &str) -> usize {
        let prefix = format!("{} ", op);
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn record(&self, op: &str, target: &str) {
        self.state().calls.push(format!("{} {}", op, target));
    }

    fn wc_status(state: &MemoryState, wc: &Path) -> Result<Vec<StatusEntry>, TransportError> {
        let copy = state
            .working_copies
            .get(wc)
            .ok_or_else(|| failed(format!("svn: E155007: '{}' is not a working copy", wc.display())))?;
        let disk = disk_files(wc).map_err(local_error)?;

        let mut entries = Vec::new();
        for (path, content) in &disk {
            let code = if copy.added.contains(path) {
                'A'
            } else {
                match copy.base.get(path) {
                    None => '?',
                    Some(base) if base != content => 'M',
                    Some(_) => continue,
                }
            };
            entries.push(StatusEntry {
                code,
                path: path.clone(),
            });
        }
        for path in copy.base.keys() {
            if disk.contains_key(path) {
                continue;
            }
            let code = if copy.removed.contains(path) { 'D' } else { '!' };
            entries.push(StatusEntry {
                code,
                path: path.clone(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

impl VcsBackend for MemoryBackend {
    fn info(&self, target: &str) -> Reply<NodeKind> {
        self.record("info", target);
        let state = self.state();
        let Some(key) = url_key(target) else {
            return if state.working_copies.contains_key(Path::new(target)) {
                Reply::Ok(NodeKind::Dir)
            } else {
                Reply::from_error(failed(format!(
                    "svn: E155010: The node '{}' was not found.",
                    target
                )))
            };
        };
        if let Err(err) = state.check_access(target) {
            return Reply::from_error(err);
        }

        if state.files.contains_key(&key) {
            Reply::Ok(NodeKind::File)
        } else if state.is_dir(&key) {
            Reply::Ok(NodeKind::Dir)
        } else {
            Reply::from_error(not_found(target))
        }
    }

    fn list(&self, url: &str) -> Reply<Vec<String>> {
        self.record("list", url);
        let state = self.state();
        if let Err(err) = state.check_access(url) {
            return Reply::from_error(err);
        }
        let Some(key) = url_key(url) else {
            return Reply::from_error(not_found(url));
        };
        if !state.is_dir(&key) {
            return Reply::from_error(not_found(url));
        }

        let mut names = BTreeSet::new();
        for rel in state.files_under(&key).keys() {
            names.insert(rel.split('/').next().unwrap_or(rel).to_string());
        }
        for rel in state.dirs_under(&key) {
            names.insert(rel.split('/').next().unwrap_or(&rel).to_string());
        }
        Reply::Ok(names.into_iter().collect())
    }

    fn cat(&self, url: &str) -> Reply<Vec<u8>> {
        self.record("cat", url);
        let state = self.state();
        if let Err(err) = state.check_access(url) {
            return Reply::from_error(err);
        }
        match url_key(url).and_then(|key| state.files.get(&key).cloned()) {
            Some(content) => Reply::Ok(content),
            None => Reply::from_error(not_found(url)),
        }
    }

    fn export(&self, url: &str, dest: &Path) -> Reply<usize> {
        self.record("export", url);
        let state = self.state();
        if let Err(err) = state.check_access(url) {
            return Reply::from_error(err);
        }
        let Some(key) = url_key(url).filter(|k| state.is_dir(k)) else {
            return Reply::from_error(not_found(url));
        };

        let files = state.files_under(&key);
        for (rel, content) in &files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return Reply::Failed(local_error(e));
                }
            }
            if let Err(e) = fs::write(&path, content) {
                return Reply::Failed(local_error(e));
            }
        }
        Reply::Ok(files.len())
    }

    fn checkout(&self, url: &str, dest: &Path) -> Reply<usize> {
        self.record("checkout", url);
        let mut state = self.state();
        if let Err(err) = state.check_access(url) {
            return Reply::from_error(err);
        }
        let Some(key) = url_key(url).filter(|k| state.is_dir(k)) else {
            return Reply::from_error(not_found(url));
        };

        let files = state.files_under(&key);
        let dirs = state.dirs_under(&key);
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(dest.join(WC_ADMIN_DIR))?;
            for dir in &dirs {
                fs::create_dir_all(dest.join(dir))?;
            }
            for (rel, content) in &files {
                let path = dest.join(rel);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, content)?;
            }
            Ok(())
        };
        if let Err(e) = write() {
            return Reply::Failed(local_error(e));
        }

        let added = files.len() + dirs.len();
        state.working_copies.insert(
            dest.to_path_buf(),
            WorkingCopy {
                key,
                base: files,
                ..Default::default()
            },
        );
        Reply::Ok(added)
    }

    fn status(&self, wc: &Path) -> Reply<Vec<StatusEntry>> {
        self.record("status", &wc.to_string_lossy());
        let state = self.state();
        match Self::wc_status(&state, wc) {
            Ok(entries) => Reply::Ok(entries),
            Err(err) => Reply::from_error(err),
        }
    }

    fn add(&self, wc: &Path, paths: &[String]) -> Reply<()> {
        self.record("add", &wc.to_string_lossy());
        let mut state = self.state();
        let disk = match disk_files(wc) {
            Ok(disk) => disk,
            Err(e) => return Reply::Failed(local_error(e)),
        };
        let Some(copy) = state.working_copies.get_mut(wc) else {
            return Reply::from_error(failed(format!(
                "svn: E155007: '{}' is not a working copy",
                wc.display()
            )));
        };

        for path in paths {
            let prefix = format!("{}/", path);
            for rel in disk.keys().filter(|k| *k == path || k.starts_with(&prefix)) {
                if !copy.base.contains_key(rel) {
                    copy.added.insert(rel.clone());
                }
                copy.removed.remove(rel);
            }
        }
        Reply::Ok(())
    }

    fn remove(&self, wc: &Path, paths: &[String]) -> Reply<()> {
        self.record("remove", &wc.to_string_lossy());
        let mut state = self.state();
        let Some(copy) = state.working_copies.get_mut(wc) else {
            return Reply::from_error(failed(format!(
                "svn: E155007: '{}' is not a working copy",
                wc.display()
            )));
        };

        for path in paths {
            let full = wc.join(path);
            if full.is_file() {
                if let Err(e) = fs::remove_file(&full) {
                    return Reply::Failed(local_error(e));
                }
            }
            let prefix = format!("{}/", path);
            let doomed: Vec<String> = copy
                .base
                .keys()
                .filter(|k| *k == path || k.starts_with(&prefix))
                .cloned()
                .collect();
            copy.removed.extend(doomed);
            copy.added.remove(path);
        }
        Reply::Ok(())
    }

    fn commit(&self, wc: &Path, message: &CommitMessage) -> Reply<u64> {
        self.record("commit", &wc.to_string_lossy());
        if let CommitMessage::File(path) = message {
            if !path.is_file() {
                return Reply::Failed(failed(format!(
                    "svn: E000002: Can't open file '{}'",
                    path.display()
                )));
            }
        }

        let disk = match disk_files(wc) {
            Ok(disk) => disk,
            Err(e) => return Reply::Failed(local_error(e)),
        };
        let mut state = self.state();
        let Some(mut copy) = state.working_copies.remove(wc) else {
            return Reply::from_error(failed(format!(
                "svn: E155007: '{}' is not a working copy",
                wc.display()
            )));
        };

        let mut changed = !copy.pending_props.is_empty() || !copy.removed.is_empty();
        let mut next_base = BTreeMap::new();
        for (path, base) in &copy.base {
            if copy.removed.contains(path) {
                continue;
            }
            match disk.get(path) {
                Some(current) => {
                    changed |= current != base;
                    next_base.insert(path.clone(), current.clone());
                }
                // missing but not scheduled for removal stays in the repository
                None => {
                    next_base.insert(path.clone(), base.clone());
                }
            }
        }
        for path in &copy.added {
            if let Some(content) = disk.get(path) {
                changed = true;
                next_base.insert(path.clone(), content.clone());
            }
        }

        if !changed {
            state.working_copies.insert(wc.to_path_buf(), copy);
            return Reply::Ok(0);
        }

        state.revision += 1;
        for path in &copy.removed {
            let key = join_key(&copy.key, path);
            state.files.remove(&key);
        }
        for (path, content) in &next_base {
            state.write_file(join_key(&copy.key, path), content.clone());
        }
        let pending = std::mem::take(&mut copy.pending_props);
        state.props.entry(copy.key.clone()).or_default().extend(pending);
        state.dirs.insert(copy.key.clone());

        copy.base = next_base;
        copy.added.clear();
        copy.removed.clear();
        let revision = state.revision;
        state.working_copies.insert(wc.to_path_buf(), copy);
        Reply::Ok(revision)
    }

    fn propget(&self, name: &str, target: &str) -> Reply<String> {
        self.record("propget", &format!("{} {}", name, target));
        let state = self.state();
        let value = match url_key(target) {
            Some(key) => {
                if let Err(err) = state.check_access(target) {
                    return Reply::from_error(err);
                }
                if !state.is_dir(&key) && !state.files.contains_key(&key) {
                    return Reply::from_error(not_found(target));
                }
                state.props.get(&key).and_then(|p| p.get(name)).cloned()
            }
            None => state.working_copies.get(Path::new(target)).and_then(|copy| {
                copy.pending_props
                    .get(name)
                    .or_else(|| state.props.get(&copy.key).and_then(|p| p.get(name)))
                    .cloned()
            }),
        };

        match value {
            Some(value) => Reply::Ok(value),
            None => Reply::from_error(failed(format!(
                "svn: W200017: Property '{}' not found on '{}'",
                name, target
            ))),
        }
    }

    fn propset(&self, name: &str, value: &str, wc: &Path) -> Reply<()> {
        self.record("propset", &format!("{} {}", name, wc.to_string_lossy()));
        let mut state = self.state();
        match state.working_copies.get_mut(wc) {
            Some(copy) => {
                copy.pending_props.insert(name.to_string(), value.to_string());
                Reply::Ok(())
            }
            None => Reply::from_error(failed(format!(
                "svn: E155007: '{}' is not a working copy",
                wc.display()
            ))),
        }
    }

    fn propset_remote(&self, name: &str, value: &str, url: &str, _message: &str) -> Reply<u64> {
        self.record("propset_remote", &format!("{} {}", name, url));
        let mut state = self.state();
        if let Err(err) = state.check_access(url) {
            return Reply::from_error(err);
        }
        let Some(key) = url_key(url).filter(|k| state.is_dir(k) || state.files.contains_key(k))
        else {
            return Reply::from_error(not_found(url));
        };
        state
            .props
            .entry(key)
            .or_default()
            .insert(name.to_string(), value.to_string());
        state.revision += 1;
        Reply::Ok(state.revision)
    }

    fn mkdir(&self, url: &str, _message: &str) -> Reply<u64> {
        self.record("mkdir", url);
        let mut state = self.state();
        if let Err(err) = state.check_access(url) {
            return Reply::from_error(err);
        }
        let Some(key) = url_key(url) else {
            return Reply::from_error(not_found(url));
        };
        if state.files.contains_key(&key) || state.dirs.contains(&key) {
            return Reply::Failed(failed(format!("svn: E160020: Path '{}' already exists", url)));
        }
        state.dirs.insert(key);
        state.revision += 1;
        Reply::Ok(state.revision)
    }

    fn copy(&self, from_url: &str, to_url: &str, _message: &str) -> Reply<u64> {
        self.record("copy", &format!("{} {}", from_url, to_url));
        let mut state = self.state();
        if let Err(err) = state.check_access(from_url) {
            return Reply::from_error(err);
        }
        let (Some(from), Some(to)) = (url_key(from_url), url_key(to_url)) else {
            return Reply::from_error(not_found(from_url));
        };
        if !state.is_dir(&from) {
            return Reply::from_error(not_found(from_url));
        }
        if state.is_dir(&to) {
            return Reply::Failed(failed(format!("svn: E160020: Path '{}' already exists", to_url)));
        }

        for (rel, content) in state.files_under(&from) {
            state.write_file(join_key(&to, &rel), content);
        }
        for rel in state.dirs_under(&from) {
            state.dirs.insert(join_key(&to, &rel));
        }
        state.dirs.insert(to.clone());
        if let Some(props) = state.props.get(&from).cloned() {
            state.props.insert(to, props);
        }
        state.revision += 1;
        Reply::Ok(state.revision)
    }

    fn diff_summarize(&self, old_url: &str, new_url: &str) -> Reply<Vec<DiffEntry>> {
        self.record("diff_summarize", &format!("{} {}", old_url, new_url));
        let state = self.state();
        if let Err(err) = state.check_access(old_url) {
            return Reply::from_error(err);
        }
        let (Some(old), Some(new)) = (url_key(old_url), url_key(new_url)) else {
            return Reply::from_error(not_found(old_url));
        };
        for (key, url) in [(&old, old_url), (&new, new_url)] {
            if !state.is_dir(key) {
                return Reply::from_error(not_found(url));
            }
        }

        let old_files = state.files_under(&old);
        let new_files = state.files_under(&new);
        let old_dirs = state.dirs_under(&old);
        let mut entries = Vec::new();

        for (path, content) in &new_files {
            let item = match old_files.get(path) {
                None => DiffItem::Added,
                Some(prev) if prev != content => DiffItem::Modified,
                Some(_) => continue,
            };
            entries.push(DiffEntry {
                path: path.clone(),
                item,
                kind: None,
            });
        }
        for path in old_files.keys().filter(|p| !new_files.contains_key(*p)) {
            entries.push(DiffEntry {
                path: path.clone(),
                item: DiffItem::Deleted,
                kind: None,
            });
        }
        for dir in state.dirs_under(&new).difference(&old_dirs) {
            entries.push(DiffEntry {
                path: dir.clone(),
                item: DiffItem::Added,
                kind: None,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Reply::Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUNK: &str = "svn+ssh://svn@repo.test/jsmith/shop/trunk";

    #[test]
    fn test_url_key() {
        assert_eq!(url_key("svn://repo.test/jsmith/shop/trunk").unwrap(), "jsmith/shop/trunk");
        assert_eq!(url_key(TRUNK).unwrap(), "jsmith/shop/trunk");
        assert_eq!(url_key("file:///srv/repo/a/b").unwrap(), "srv/repo/a/b");
        assert!(url_key("/tmp/wc").is_none());
    }

    #[test]
    fn test_checkout_status_commit_cycle() {
        let backend = MemoryBackend::new();
        backend.put_file(&format!("{}/src/A.php", TRUNK), b"a");
        let dir = tempfile::tempdir().unwrap();
        let wc = dir.path().join("wc");

        assert!(backend.checkout(TRUNK, &wc).is_ok());
        assert_eq!(fs::read(wc.join("src/A.php")).unwrap(), b"a");

        fs::write(wc.join("src/B.php"), b"b").unwrap();
        fs::write(wc.join("src/A.php"), b"a2").unwrap();
        let status = backend.status(&wc).ok().unwrap();
        let codes: Vec<(char, &str)> = status.iter().map(|s| (s.code, s.path.as_str())).collect();
        assert_eq!(codes, vec![('M', "src/A.php"), ('?', "src/B.php")]);

        backend.add(&wc, &["src/B.php".to_string()]).ok().unwrap();
        backend.propset("merkle_root", "abc", &wc).ok().unwrap();
        let rev = backend
            .commit(&wc, &CommitMessage::Text("msg".to_string()))
            .ok()
            .unwrap();
        assert!(rev > 0);

        assert_eq!(backend.file(&format!("{}/src/A.php", TRUNK)).unwrap(), b"a2");
        assert_eq!(backend.file(&format!("{}/src/B.php", TRUNK)).unwrap(), b"b");
        assert_eq!(backend.propget("merkle_root", TRUNK).ok().unwrap(), "abc");
        assert!(backend.status(&wc).ok().unwrap().is_empty());
    }

    #[test]
    fn test_remove_is_committed() {
        let backend = MemoryBackend::new();
        backend.put_file(&format!("{}/src/A.php", TRUNK), b"a");
        let dir = tempfile::tempdir().unwrap();
        let wc = dir.path().join("wc");
        backend.checkout(TRUNK, &wc).ok().unwrap();

        fs::remove_file(wc.join("src/A.php")).unwrap();
        assert_eq!(backend.status(&wc).ok().unwrap()[0].code, '!');

        backend.remove(&wc, &["src/A.php".to_string()]).ok().unwrap();
        backend
            .commit(&wc, &CommitMessage::Text("rm".to_string()))
            .ok()
            .unwrap();
        assert!(backend.file(&format!("{}/src/A.php", TRUNK)).is_none());
    }

    #[test]
    fn test_copy_carries_props_and_diff() {
        let backend = MemoryBackend::new();
        let base = "svn://repo.test/jsmith/shop";
        backend.put_file(&format!("{}/trunk/src/A.php", base), b"a");
        backend.put_file(&format!("{}/trunk/src/B.php", base), b"b");
        backend.set_prop(&format!("{}/trunk", base), "merkle_root", "r1");
        backend
            .copy(&format!("{}/trunk", base), &format!("{}/tags/1.0.0", base), "tag")
            .ok()
            .unwrap();

        backend.put_file(&format!("{}/trunk/src/A.php", base), b"a2");
        backend.put_file(&format!("{}/trunk/src/C/D.php", base), b"d");
        backend
            .copy(&format!("{}/trunk", base), &format!("{}/tags/1.1.0", base), "tag")
            .ok()
            .unwrap();

        assert_eq!(
            backend.propget("merkle_root", &format!("{}/tags/1.0.0", base)).ok().unwrap(),
            "r1"
        );
        assert_eq!(
            backend.list(&format!("{}/tags", base)).ok().unwrap(),
            vec!["1.0.0", "1.1.0"]
        );

        let diff = backend
            .diff_summarize(&format!("{}/tags/1.0.0", base), &format!("{}/tags/1.1.0", base))
            .ok()
            .unwrap();
        let paths: Vec<&str> = diff.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["src/A.php", "src/C", "src/C/D.php"]);
    }

    #[test]
    fn test_deny_anonymous() {
        let backend = MemoryBackend::new();
        backend.put_file("svn://repo.test/a/b/trunk/x", b"x");
        backend.deny_anonymous(true);

        let reply = backend.list("svn://repo.test/a/b/trunk");
        assert!(matches!(reply, Reply::Failed(_)));
        assert!(backend.list("svn+ssh://svn@repo.test/a/b/trunk").is_ok());
    }

    #[test]
    fn test_missing_prop_is_not_found() {
        let backend = MemoryBackend::new();
        backend.mkdir(TRUNK, "init").ok().unwrap();
        assert!(matches!(backend.propget("merkle_root", TRUNK), Reply::NotFound(_)));
        assert!(matches!(
            backend.propget("merkle_root", "svn://repo.test/nope"),
            Reply::NotFound(_)
        ));
    }
}
