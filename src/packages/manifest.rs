// src/packages/manifest.rs

//! Package manifest (`etc/package.toml` in the SVN layout)
//!
//! Only the fields consumed by install and upgrade are modelled:
//!
//! ```toml
//! [package]
//! version = "1.2.0"
//! type = "package"
//!
//! [dependencies]
//! "jsmith/users" = "latest"
//!
//! [composer]
//! "guzzlehttp/guzzle" = "^7.0"
//!
//! [routes]
//! "/cart" = "Shop\\Views\\Cart"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

/// SVN-relative location of the manifest
pub const MANIFEST_PATH: &str = "etc/package.toml";

/// SVN-relative directory holding migration scripts
pub const MIGRATIONS_DIR: &str = "etc/migrations";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestInfo {
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub package_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub package: ManifestInfo,
    /// Package serial -> version constraint
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Composer package -> constraint, merged into the project's composer.json
    #[serde(default)]
    pub composer: BTreeMap<String, String>,
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
    #[serde(default)]
    pub themes: BTreeMap<String, String>,
    #[serde(default)]
    pub user_types: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse manifest text
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Parse(format!("Invalid package manifest: {}", e)))
    }

    /// Load the manifest from a directory in SVN layout
    ///
    /// A package without a manifest has no dependencies and no registry entries.
    pub fn load(svn_dir: &Path) -> Result<Self> {
        let path = svn_dir.join(MANIFEST_PATH);
        if !path.exists() {
            debug!("No manifest at {}", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        Self::parse(&text)
    }

    /// Declared dependencies with parsed constraints
    pub fn dependencies(&self) -> Result<Vec<(String, VersionConstraint)>> {
        self.dependencies
            .iter()
            .map(|(serial, constraint)| {
                if !serial.contains('/') {
                    return Err(Error::Parse(format!(
                        "Dependency '{}' must be written as author/alias",
                        serial
                    )));
                }
                Ok((serial.clone(), VersionConstraint::parse(constraint)))
            })
            .collect()
    }
}

/// Version requested for a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Latest,
    Dev,
    Exact(String),
}

impl VersionConstraint {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "latest" | "*" => VersionConstraint::Latest,
            "dev" | "trunk" => VersionConstraint::Dev,
            other => VersionConstraint::Exact(other.trim_start_matches('v').to_string()),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Latest => write!(f, "latest"),
            VersionConstraint::Dev => write!(f, "dev"),
            VersionConstraint::Exact(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::parse(
            r#"
            [package]
            version = "1.2.0"
            type = "package"

            [dependencies]
            "jsmith/users" = "latest"
            "jsmith/payments" = "2.0.1"
            "acme/tools" = "dev"

            [composer]
            "guzzlehttp/guzzle" = "^7.0"

            [routes]
            "/cart" = "Shop\\Views\\Cart"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.package.version.as_deref(), Some("1.2.0"));
        let deps = manifest.dependencies().unwrap();
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&("acme/tools".to_string(), VersionConstraint::Dev)));
        assert!(deps.contains(&(
            "jsmith/payments".to_string(),
            VersionConstraint::Exact("2.0.1".to_string())
        )));
        assert_eq!(manifest.composer.len(), 1);
        assert_eq!(manifest.routes["/cart"], "Shop\\Views\\Cart");
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::load(dir.path()).unwrap();
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn test_bad_dependency_serial() {
        let manifest = Manifest::parse("[dependencies]\nusers = \"latest\"\n").unwrap();
        assert!(manifest.dependencies().is_err());
    }
}
