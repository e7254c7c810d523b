// src/svn/shell.rs

//! `svn` command-line backend
//!
//! Every call spawns the svn binary with `--non-interactive`, waits for it
//! under a hard timeout and turns non-zero exits into classified [`Reply`]
//! failures.

use crate::svn::transport::{
    CommitMessage, DiffEntry, DiffItem, NodeKind, Reply, StatusEntry, TransportError, VcsBackend,
};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use walkdir::WalkDir;

/// Captured output of a finished process
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run `cmd` to completion, killing it once `timeout` elapses
pub(crate) fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    stdin: Option<&[u8]>,
) -> std::result::Result<CommandOutput, TransportError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

    let program = cmd.get_program().to_string_lossy().to_string();
    let mut child = cmd
        .spawn()
        .map_err(|e| TransportError::local(format!("Unable to run {}: {}", program, e)))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let _ = pipe.write_all(input);
    }

    let out = drain(child.stdout.take());
    let err = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::local(format!(
                    "{} timed out after {} seconds",
                    program,
                    timeout.as_secs()
                )));
            }
            Ok(None) => thread::sleep(Duration::from_millis(25)),
            Err(e) => {
                return Err(TransportError::local(format!(
                    "Unable to wait for {}: {}",
                    program, e
                )));
            }
        }
    };

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: out.join().unwrap_or_default(),
        stderr: String::from_utf8_lossy(&err.join().unwrap_or_default()).to_string(),
    })
}

/// Backend driving the `svn` and `svnmucc` binaries
#[derive(Debug, Clone)]
pub struct ShellBackend {
    bin: String,
    timeout: Duration,
    ssh_key: Option<PathBuf>,
}

impl ShellBackend {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
            ssh_key: None,
        }
    }

    /// Identity passed to ssh for `svn+ssh://` URLs
    pub fn with_ssh_key(mut self, key: Option<PathBuf>) -> Self {
        self.ssh_key = key;
        self
    }

    fn mucc_bin(&self) -> String {
        match self.bin.strip_suffix("svn") {
            Some(prefix) => format!("{}svnmucc", prefix),
            None => "svnmucc".to_string(),
        }
    }

    fn exec_program(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Reply<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.arg("--non-interactive").args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        if let Some(key) = &self.ssh_key {
            cmd.env(
                "SVN_SSH",
                format!("ssh -q -o BatchMode=yes -i {}", key.display()),
            );
        }

        debug!("Running {} {}", program, args.join(" "));

        match run_with_timeout(cmd, self.timeout, None) {
            Ok(output) if output.success => Reply::Ok(output),
            Ok(output) => Reply::from_error(TransportError::new(output.stderr, output.code)),
            Err(err) => Reply::Failed(err),
        }
    }

    fn exec(&self, args: &[&str], cwd: Option<&Path>) -> Reply<CommandOutput> {
        self.exec_program(&self.bin, args, cwd)
    }
}

fn committed_revision(stdout: &str) -> u64 {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Committed revision "))
        .filter_map(|rest| rest.trim_end_matches('.').parse().ok())
        .next_back()
        .unwrap_or(0)
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

fn parse_status(stdout: &str) -> Vec<StatusEntry> {
    stdout
        .lines()
        .filter(|line| line.len() > 8)
        .filter_map(|line| {
            let code = line.chars().next()?;
            let path = line.get(8..)?.trim();
            if path.is_empty() {
                return None;
            }
            Some(StatusEntry {
                code,
                path: path.replace('\\', "/"),
            })
        })
        .collect()
}

/// Extract the `kind` attribute of the first `<entry>` in `svn info --xml`
pub(crate) fn parse_info_kind(xml: &str) -> std::result::Result<Option<NodeKind>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"entry" => {
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    if attr.key.as_ref() == b"kind" {
                        let value = attr.unescape_value().map_err(|e| e.to_string())?;
                        return Ok(match value.as_ref() {
                            "file" => Some(NodeKind::File),
                            "dir" => Some(NodeKind::Dir),
                            _ => None,
                        });
                    }
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
}

/// Parse `svn diff --summarize --xml`, making paths relative to either URL
pub(crate) fn parse_diff_summary(
    xml: &str,
    old_url: &str,
    new_url: &str,
) -> std::result::Result<Vec<DiffEntry>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut pending: Option<(DiffItem, Option<NodeKind>)> = None;

    let relative = |full: &str| -> String {
        let full = full.trim();
        for base in [old_url, new_url] {
            let base = base.trim_end_matches('/');
            if let Some(rest) = full.strip_prefix(base) {
                return rest.trim_start_matches('/').to_string();
            }
        }
        full.trim_start_matches('/').to_string()
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"path" => {
                let mut item = None;
                let mut kind = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    let value = attr.unescape_value().map_err(|e| e.to_string())?;
                    match attr.key.as_ref() {
                        b"item" => {
                            item = match value.as_ref() {
                                "added" => Some(DiffItem::Added),
                                "modified" => Some(DiffItem::Modified),
                                "deleted" => Some(DiffItem::Deleted),
                                _ => None,
                            }
                        }
                        b"kind" => {
                            kind = match value.as_ref() {
                                "file" => Some(NodeKind::File),
                                "dir" => Some(NodeKind::Dir),
                                _ => None,
                            }
                        }
                        _ => {}
                    }
                }
                // property-only changes carry item="none"
                pending = item.map(|item| (item, kind));
            }
            Ok(Event::Text(text)) => {
                if let Some((item, kind)) = pending.take() {
                    let path = text.unescape().map_err(|e| e.to_string())?;
                    let path = relative(&path);
                    if !path.is_empty() {
                        entries.push(DiffEntry { path, item, kind });
                    }
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"path" => pending = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

impl VcsBackend for ShellBackend {
    fn info(&self, target: &str) -> Reply<NodeKind> {
        match self.exec(&["info", "--xml", target], None) {
            Reply::Ok(output) => match parse_info_kind(&output.stdout_text()) {
                Ok(Some(kind)) => Reply::Ok(kind),
                Ok(None) => Reply::NotFound(TransportError::local(format!(
                    "No node kind reported for {}",
                    target
                ))),
                Err(e) => Reply::Failed(TransportError::local(format!(
                    "Unable to parse svn info output: {}",
                    e
                ))),
            },
            Reply::NotFound(err) => Reply::NotFound(err),
            Reply::Failed(err) => Reply::Failed(err),
        }
    }

    fn list(&self, url: &str) -> Reply<Vec<String>> {
        self.exec(&["ls", url], None).map(|output| {
            output
                .stdout_text()
                .lines()
                .map(|line| line.trim().trim_end_matches('/').to_string())
                .filter(|line| !line.is_empty())
                .collect()
        })
    }

    fn cat(&self, url: &str) -> Reply<Vec<u8>> {
        self.exec(&["cat", url], None).map(|output| output.stdout)
    }

    fn export(&self, url: &str, dest: &Path) -> Reply<usize> {
        let dest_str = dest.to_string_lossy();
        self.exec(&["export", "--force", "-q", url, &dest_str], None)
            .map(|_| count_files(dest))
    }

    fn checkout(&self, url: &str, dest: &Path) -> Reply<usize> {
        let dest_str = dest.to_string_lossy();
        self.exec(&["checkout", url, &dest_str], None).map(|output| {
            output
                .stdout_text()
                .lines()
                .filter(|line| line.starts_with("A "))
                .count()
        })
    }

    fn status(&self, wc: &Path) -> Reply<Vec<StatusEntry>> {
        self.exec(&["status"], Some(wc))
            .map(|output| parse_status(&output.stdout_text()))
    }

    fn add(&self, wc: &Path, paths: &[String]) -> Reply<()> {
        if paths.is_empty() {
            return Reply::Ok(());
        }
        let mut args = vec!["add", "--parents", "--force"];
        args.extend(paths.iter().map(|p| p.as_str()));
        self.exec(&args, Some(wc)).map(|_| ())
    }

    fn remove(&self, wc: &Path, paths: &[String]) -> Reply<()> {
        if paths.is_empty() {
            return Reply::Ok(());
        }
        let mut args = vec!["rm", "--force"];
        args.extend(paths.iter().map(|p| p.as_str()));
        self.exec(&args, Some(wc)).map(|_| ())
    }

    fn commit(&self, wc: &Path, message: &CommitMessage) -> Reply<u64> {
        let file_arg;
        let args: Vec<&str> = match message {
            CommitMessage::Text(text) => vec!["commit", "-m", text.as_str()],
            CommitMessage::File(path) => {
                file_arg = path.to_string_lossy().to_string();
                vec!["commit", "-F", file_arg.as_str()]
            }
        };
        self.exec(&args, Some(wc))
            .map(|output| committed_revision(&output.stdout_text()))
    }

    fn propget(&self, name: &str, target: &str) -> Reply<String> {
        match self.exec(&["propget", "--strict", name, target], None) {
            Reply::Ok(output) => {
                let value = output.stdout_text().trim_end_matches(['\r', '\n']).to_string();
                if value.is_empty() {
                    Reply::NotFound(TransportError::local(format!(
                        "Property '{}' not set on {}",
                        name, target
                    )))
                } else {
                    Reply::Ok(value)
                }
            }
            other => other.map(|_| String::new()),
        }
    }

    fn propset(&self, name: &str, value: &str, wc: &Path) -> Reply<()> {
        // values such as inventories can exceed argv limits
        let mut file = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => return Reply::Failed(TransportError::local(e.to_string())),
        };
        if let Err(e) = file.write_all(value.as_bytes()) {
            return Reply::Failed(TransportError::local(e.to_string()));
        }
        let path = file.path().to_string_lossy().to_string();
        self.exec(&["propset", name, "-F", &path, "."], Some(wc))
            .map(|_| ())
    }

    fn propset_remote(&self, name: &str, value: &str, url: &str, message: &str) -> Reply<u64> {
        let mucc = self.mucc_bin();
        self.exec_program(&mucc, &["-m", message, "propset", name, value, url], None)
            .map(|output| {
                let text = output.stdout_text();
                text.lines()
                    .filter_map(|l| l.trim().strip_prefix('r'))
                    .filter_map(|l| l.split_whitespace().next())
                    .filter_map(|n| n.parse().ok())
                    .next()
                    .unwrap_or(0)
            })
    }

    fn mkdir(&self, url: &str, message: &str) -> Reply<u64> {
        self.exec(&["mkdir", "--parents", "-m", message, url], None)
            .map(|output| committed_revision(&output.stdout_text()))
    }

    fn copy(&self, from_url: &str, to_url: &str, message: &str) -> Reply<u64> {
        self.exec(&["copy", from_url, to_url, "-m", message], None)
            .map(|output| committed_revision(&output.stdout_text()))
    }

    fn diff_summarize(&self, old_url: &str, new_url: &str) -> Reply<Vec<DiffEntry>> {
        match self.exec(&["diff", "--summarize", "--xml", old_url, new_url], None) {
            Reply::Ok(output) => match parse_diff_summary(&output.stdout_text(), old_url, new_url) {
                Ok(entries) => Reply::Ok(entries),
                Err(e) => Reply::Failed(TransportError::local(format!(
                    "Unable to parse svn diff output: {}",
                    e
                ))),
            },
            Reply::NotFound(err) => Reply::NotFound(err),
            Reply::Failed(err) => Reply::Failed(err),
        }
    }
}
