// src/integrity/certs.rs

//! Local certificate store
//!
//! Certificates are OpenPGP certs kept under `.apex/certs/`, named
//! `{subject}.{issuer}.{repoAlias}`. The public half is stored as
//! `{name}.crt`, the secret half (possibly password protected) as `{name}.key`.

use crate::error::{Error, Result};
use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::parse::Parse;
use openpgp::serialize::SerializeInto;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Issuer of certificates used to sign package releases
pub const PUBLISHER_ISSUER: &str = "apex";

/// Outcome of looking something up where absence is an ordinary answer
#[derive(Debug)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// Identifies the certificate for one (account, counterpart, repository) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertName {
    pub subject: String,
    pub issuer: String,
    pub repo_alias: String,
}

impl CertName {
    pub fn new(subject: &str, issuer: &str, repo_alias: &str) -> Self {
        Self {
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            repo_alias: repo_alias.to_string(),
        }
    }

    /// Certificate a package author signs releases with on `repo_alias`
    pub fn for_publisher(author: &str, repo_alias: &str) -> Self {
        Self::new(author, PUBLISHER_ISSUER, repo_alias)
    }

    /// Parse `subject.issuer.repo`; subject and issuer may not contain dots
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, '.');
        let subject = parts.next()?;
        let issuer = parts.next()?;
        let repo = parts.next()?;
        if subject.is_empty() || issuer.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self::new(subject, issuer, repo))
    }

    pub fn file_stem(&self) -> String {
        format!("{}.{}.{}", self.subject, self.issuer, self.repo_alias)
    }
}

pub struct CertStore {
    dir: PathBuf,
}

impl CertStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &CertName, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name.file_stem(), ext))
    }

    fn read(&self, path: &Path) -> Result<Lookup<Cert>> {
        if !path.exists() {
            return Ok(Lookup::NotFound);
        }
        let bytes = fs::read(path)?;
        let cert = Cert::from_bytes(&bytes).map_err(|e| {
            Error::Signing(format!("Unable to parse certificate {}: {}", path.display(), e))
        })?;
        Ok(Lookup::Found(cert))
    }

    /// Public certificate used to verify signatures
    pub fn public(&self, name: &CertName) -> Result<Lookup<Cert>> {
        self.read(&self.path(name, "crt"))
    }

    /// Secret key material used to sign
    pub fn secret(&self, name: &CertName) -> Result<Lookup<Cert>> {
        self.read(&self.path(name, "key"))
    }

    pub fn save_public(&self, name: &CertName, cert: &Cert) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let armored = cert
            .armored()
            .to_vec()
            .map_err(|e| Error::Signing(format!("Unable to serialize certificate: {}", e)))?;
        fs::write(self.path(name, "crt"), armored)?;
        debug!("Saved certificate {}", name.file_stem());
        Ok(())
    }

    /// Save a transferable secret key along with its public certificate
    pub fn save_secret(&self, name: &CertName, cert: &Cert) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let armored = cert
            .as_tsk()
            .armored()
            .to_vec()
            .map_err(|e| Error::Signing(format!("Unable to serialize secret key: {}", e)))?;
        fs::write(self.path(name, "key"), armored)?;
        self.save_public(name, &cert.clone().strip_secret_key_material())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpgp::cert::{CertBuilder, CipherSuite};

    #[test]
    fn test_cert_name_round_trip() {
        let name = CertName::new("jsmith", "svn.example.com", "main");
        assert_eq!(name.file_stem(), "jsmith.svn.example.com.main");

        let parsed = CertName::parse("jsmith.apex.main").unwrap();
        assert_eq!(parsed, CertName::new("jsmith", "apex", "main"));
        assert!(CertName::parse("jsmith.apex").is_none());
    }

    #[test]
    fn test_missing_certificate_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        let lookup = store.public(&CertName::new("a", "b", "c")).unwrap();
        assert!(matches!(lookup, Lookup::NotFound));
    }

    #[test]
    fn test_save_secret_also_saves_public() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertStore::new(dir.path());
        let (cert, _) = CertBuilder::general_purpose(None::<CipherSuite>, Some("jsmith@example.com"))
            .generate()
            .unwrap();
        let name = CertName::new("jsmith", "apex", "main");

        store.save_secret(&name, &cert).unwrap();

        let public = store.public(&name).unwrap().into_option().unwrap();
        assert_eq!(public.fingerprint(), cert.fingerprint());
        assert!(!public.is_tsk());
        let secret = store.secret(&name).unwrap().into_option().unwrap();
        assert!(secret.is_tsk());
    }
}
