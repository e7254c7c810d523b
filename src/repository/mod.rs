// src/repository/mod.rs

//! Remote repositories and their JSON API
//!
//! This module provides functionality for:
//! - Managing the repositories packages are published to
//! - Checking, creating, updating, searching and deleting remote packages
//! - Fetching publisher certificates
//! - Downloading licensed (commercial) releases with retry support

use crate::db::models::{PackageType, Repository};
use crate::error::{Error, Result};
use crate::integrity::certs::Lookup;
use flate2::read::GzDecoder;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tar::Archive;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed requests
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Access flags for one package, as reported by `repos/check`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAccess {
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub can_read: bool,
    #[serde(default)]
    pub can_write: bool,
    /// Set for commercial packages; installs need a license id
    #[serde(default)]
    pub license: Option<String>,
}

/// One hit from `repos/search`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub serial: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    packages: Vec<RepoSummary>,
}

#[derive(Debug, Deserialize)]
struct CertificateResponse {
    #[serde(default)]
    crt: Option<String>,
}

/// Remote repository API
pub trait RepoApi {
    fn check(&self, serial: &str) -> Result<RepoAccess>;

    fn create(&self, serial: &str, package_type: PackageType) -> Result<()>;

    fn update(&self, serial: &str, fields: &serde_json::Value) -> Result<()>;

    fn search(&self, term: &str) -> Result<Vec<RepoSummary>>;

    fn delete(&self, serial: &str) -> Result<()>;

    /// Armored public certificate of `subject`
    fn fetch_certificate(&self, subject: &str) -> Result<Lookup<String>>;

    /// Download and unpack a licensed release into `dest`; returns the file count
    fn download_licensed(
        &self,
        serial: &str,
        version: &str,
        license_id: &str,
        dest: &Path,
    ) -> Result<usize>;
}

/// HTTP client for a repository's JSON API with retry support
pub struct HttpRepoApi {
    client: Client,
    base: String,
    auth: Option<(String, String)>,
    max_retries: u32,
}

impl HttpRepoApi {
    pub fn new(base: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            auth: None,
            max_retries: MAX_RETRIES,
        })
    }

    /// Client for a configured repository
    pub fn for_repository(repo: &Repository) -> Result<Self> {
        Self::new(&repo.api_base())
    }

    /// Authenticate every request as `account`
    pub fn set_auth(&mut self, account: &str, api_key: &str) {
        self.auth = Some((account.to_string(), api_key.to_string()));
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((account, key)) => request.basic_auth(account, Some(key)),
            None => request,
        }
    }

    /// Send a request built by `build`, retrying transport errors
    fn send(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.authorize(build()).send() {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(Error::PermissionDenied(format!("{} (HTTP {})", what, status)));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(Error::NotFound(what.to_string()));
                    }
                    if !status.is_success() {
                        return Err(Error::Download(format!("HTTP {} from {}", status, what)));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "{} failed after {} attempts: {}",
                            what, attempt, e
                        )));
                    }
                    warn!("{} attempt {} failed: {}, retrying...", what, attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<Response> {
        let url = self.endpoint(path);
        debug!("POST {}", url);
        self.send(&url, || self.client.post(&url).json(body))
    }
}

impl RepoApi for HttpRepoApi {
    fn check(&self, serial: &str) -> Result<RepoAccess> {
        let response = self.post("repos/check", &serde_json::json!({ "package": serial }))?;
        response
            .json()
            .map_err(|e| Error::Download(format!("Invalid repos/check response: {}", e)))
    }

    fn create(&self, serial: &str, package_type: PackageType) -> Result<()> {
        self.post(
            "repos/create",
            &serde_json::json!({ "package": serial, "type": package_type.as_str() }),
        )?;
        info!("Created remote repository for {}", serial);
        Ok(())
    }

    fn update(&self, serial: &str, fields: &serde_json::Value) -> Result<()> {
        self.post(
            "repos/update",
            &serde_json::json!({ "package": serial, "fields": fields }),
        )?;
        Ok(())
    }

    fn search(&self, term: &str) -> Result<Vec<RepoSummary>> {
        let response = self.post("repos/search", &serde_json::json!({ "term": term }))?;
        let parsed: SearchResponse = response
            .json()
            .map_err(|e| Error::Download(format!("Invalid repos/search response: {}", e)))?;
        Ok(parsed.packages)
    }

    fn delete(&self, serial: &str) -> Result<()> {
        self.post("repos/delete", &serde_json::json!({ "package": serial }))?;
        info!("Deleted remote repository for {}", serial);
        Ok(())
    }

    fn fetch_certificate(&self, subject: &str) -> Result<Lookup<String>> {
        let response = match self.post("certs/get", &serde_json::json!({ "subject": subject })) {
            Ok(response) => response,
            Err(Error::NotFound(_)) => return Ok(Lookup::NotFound),
            Err(e) => return Err(e),
        };
        let parsed: CertificateResponse = response
            .json()
            .map_err(|e| Error::Download(format!("Invalid certs/get response: {}", e)))?;
        Ok(match parsed.crt {
            Some(crt) if !crt.trim().is_empty() => Lookup::Found(crt),
            _ => Lookup::NotFound,
        })
    }

    fn download_licensed(
        &self,
        serial: &str,
        version: &str,
        license_id: &str,
        dest: &Path,
    ) -> Result<usize> {
        let url = self.endpoint("repos/download");
        info!("Downloading licensed {} {} from {}", serial, version, url);

        let mut response = self.send(&url, || {
            self.client.get(&url).query(&[
                ("package", serial),
                ("version", version),
                ("license_id", license_id),
            ])
        })?;

        // Write to a temporary archive first
        let archive = tempfile::NamedTempFile::new()?;
        let mut file = archive.reopen()?;
        io::copy(&mut response, &mut file)
            .map_err(|e| Error::Download(format!("Failed to write downloaded data: {}", e)))?;

        unpack_tar_gz(archive.path(), dest)
    }
}

/// Unpack a `.tar.gz` into `dest`, refusing entries that escape it
pub fn unpack_tar_gz(archive: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(File::open(archive)?));

    let mut count = 0;
    for entry in archive
        .entries()
        .map_err(|e| Error::Download(format!("Corrupt archive: {}", e)))?
    {
        let mut entry = entry.map_err(|e| Error::Download(format!("Corrupt archive: {}", e)))?;
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| Error::Download(format!("Unable to unpack archive: {}", e)))?;
        if !unpacked {
            warn!("Skipped archive entry outside {}", dest.display());
        } else if is_file {
            count += 1;
        }
    }

    debug!("Unpacked {} files into {}", count, dest.display());
    Ok(count)
}

#[derive(Debug, Default)]
struct OfflineState {
    packages: BTreeMap<String, RepoAccess>,
    certificates: BTreeMap<String, String>,
    calls: Vec<String>,
}

/// API stand-in for `file://` repositories and tests
///
/// Packages are readable and writable unless registered otherwise;
/// `create` marks a package as existing.
#[derive(Debug, Default)]
pub struct OfflineApi {
    state: Mutex<OfflineState>,
}

impl OfflineApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, OfflineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, serial: &str, access: RepoAccess) {
        self.state().packages.insert(serial.to_string(), access);
    }

    pub fn publish_certificate(&self, subject: &str, armored: &str) {
        self.state()
            .certificates
            .insert(subject.to_string(), armored.to_string());
    }

    /// Calls made so far, as `"{op} {serial}"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn record(&self, op: &str, target: &str) {
        self.state().calls.push(format!("{} {}", op, target));
    }
}

impl RepoApi for OfflineApi {
    fn check(&self, serial: &str) -> Result<RepoAccess> {
        self.record("check", serial);
        Ok(self.state().packages.get(serial).cloned().unwrap_or(RepoAccess {
            exists: false,
            can_read: true,
            can_write: true,
            license: None,
        }))
    }

    fn create(&self, serial: &str, _package_type: PackageType) -> Result<()> {
        self.record("create", serial);
        let mut state = self.state();
        let access = state.packages.entry(serial.to_string()).or_insert(RepoAccess {
            exists: false,
            can_read: true,
            can_write: true,
            license: None,
        });
        if access.exists {
            return Err(Error::AlreadyExists(format!("Repository for {}", serial)));
        }
        access.exists = true;
        Ok(())
    }

    fn update(&self, serial: &str, _fields: &serde_json::Value) -> Result<()> {
        self.record("update", serial);
        Ok(())
    }

    fn search(&self, term: &str) -> Result<Vec<RepoSummary>> {
        self.record("search", term);
        Ok(self
            .state()
            .packages
            .iter()
            .filter(|(serial, access)| access.exists && serial.contains(term))
            .map(|(serial, _)| RepoSummary {
                serial: serial.clone(),
                version: None,
                description: None,
            })
            .collect())
    }

    fn delete(&self, serial: &str) -> Result<()> {
        self.record("delete", serial);
        self.state()
            .packages
            .remove(serial)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Repository for {}", serial)))
    }

    fn fetch_certificate(&self, subject: &str) -> Result<Lookup<String>> {
        self.record("fetch_certificate", subject);
        Ok(match self.state().certificates.get(subject) {
            Some(crt) => Lookup::Found(crt.clone()),
            None => Lookup::NotFound,
        })
    }

    fn download_licensed(
        &self,
        serial: &str,
        _version: &str,
        _license_id: &str,
        _dest: &Path,
    ) -> Result<usize> {
        self.record("download_licensed", serial);
        Err(Error::Download(format!(
            "Licensed downloads of {} need a remote repository",
            serial
        )))
    }
}

/// Add a new repository to the database
pub fn add_repository(
    conn: &Connection,
    alias: &str,
    host: &str,
    api_url: Option<String>,
    local_path: Option<String>,
) -> Result<Repository> {
    // Check if repository with this alias already exists
    if Repository::find_by_alias(conn, alias)?.is_some() {
        return Err(Error::AlreadyExists(format!(
            "Repository '{}' already exists",
            alias
        )));
    }

    let mut repo = Repository::new(alias.to_string(), host.to_string());
    repo.api_url = api_url;
    repo.local_path = local_path;
    repo.insert(conn)?;

    info!("Added repository: {} ({})", repo.alias, repo.host);
    Ok(repo)
}

/// Remove a repository from the database
pub fn remove_repository(conn: &Connection, alias: &str) -> Result<()> {
    Repository::get(conn, alias)?;
    Repository::delete(conn, alias)?;
    info!("Removed repository: {}", alias);
    Ok(())
}

/// API client appropriate for `repo`
pub fn api_for(repo: &Repository, account: &str, api_key: Option<&str>) -> Result<Box<dyn RepoApi>> {
    if repo.is_local() {
        return Ok(Box::new(OfflineApi::new()));
    }
    let mut api = HttpRepoApi::for_repository(repo)?;
    if let Some(key) = api_key {
        api.set_auth(account, key);
    }
    Ok(Box::new(api))
}
