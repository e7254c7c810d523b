// src/installer.rs

//! Steps that run once a package's files are in the project
//!
//! - merge the manifest's `[composer]` requirements into `composer.json`
//! - record routes, themes and user types in `registry_entries`
//! - rebuild `.apex/class_index.json` from `src/**/*.php`

use crate::config::Config;
use crate::db::models::{RegistryEntry, RegistryKind};
use crate::error::{Error, Result};
use crate::integrity::inventory::walk_files;
use crate::packages::manifest::Manifest;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use tracing::{debug, info};

pub const COMPOSER_FILE: &str = "composer.json";
pub const CLASS_INDEX_FILE: &str = "class_index.json";
const ROOT_NAMESPACE: &str = "App";

/// Add the manifest's Composer requirements the project does not already pin
///
/// Returns the packages added. Existing constraints are never overridden.
pub fn merge_composer(config: &Config, manifest: &Manifest) -> Result<Vec<String>> {
    if manifest.composer.is_empty() {
        return Ok(Vec::new());
    }

    let path = config.root.join(COMPOSER_FILE);
    let mut doc: Value = if path.exists() {
        serde_json::from_str(&fs::read_to_string(&path)?)?
    } else {
        Value::Object(Map::new())
    };

    let root = doc
        .as_object_mut()
        .ok_or_else(|| Error::Parse(format!("{} is not a JSON object", path.display())))?;
    let require = root
        .entry("require")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| Error::Parse(format!("\"require\" in {} is not an object", path.display())))?;

    let mut added = Vec::new();
    for (name, constraint) in &manifest.composer {
        if require.contains_key(name) {
            debug!("Composer requirement {} already present", name);
            continue;
        }
        require.insert(name.clone(), Value::String(constraint.clone()));
        added.push(name.clone());
    }

    if !added.is_empty() {
        fs::write(&path, serde_json::to_string_pretty(&doc)? + "\n")?;
        info!("Added {} Composer requirements", added.len());
    }
    Ok(added)
}

/// Record the routes, themes and user types a package declares
pub fn install_registry(conn: &Connection, alias: &str, manifest: &Manifest) -> Result<usize> {
    let groups = [
        (RegistryKind::Route, &manifest.routes),
        (RegistryKind::Theme, &manifest.themes),
        (RegistryKind::UserType, &manifest.user_types),
    ];

    let mut count = 0;
    for (kind, entries) in groups {
        for (key, value) in entries {
            RegistryEntry {
                package_alias: alias.to_string(),
                kind,
                key: key.clone(),
                value: value.clone(),
            }
            .upsert(conn)?;
            count += 1;
        }
    }
    if count > 0 {
        debug!("Registered {} entries for {}", count, alias);
    }
    Ok(count)
}

/// Rebuild the class index, `App\Shop\Cart` -> `src/Shop/Cart.php`
pub fn rescan_class_index(config: &Config) -> Result<usize> {
    let src = config.root.join("src");
    let mut index = BTreeMap::new();

    for (rel, _) in walk_files(&src)? {
        let Some(stem) = rel.strip_suffix(".php") else {
            continue;
        };
        let class = format!("{}\\{}", ROOT_NAMESPACE, stem.replace('/', "\\"));
        index.insert(class, format!("src/{}", rel));
    }

    fs::create_dir_all(config.apex_dir())?;
    fs::write(
        config.apex_dir().join(CLASS_INDEX_FILE),
        serde_json::to_string_pretty(&index)?,
    )?;
    debug!("Indexed {} classes", index.len());
    Ok(index.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_merge_composer_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        write(
            dir.path(),
            "composer.json",
            r#"{"name": "acme/site", "require": {"monolog/monolog": "^2.0"}}"#,
        );

        let manifest = Manifest::parse(
            r#"
[composer]
"monolog/monolog" = "^3.0"
"guzzlehttp/guzzle" = "^7.0"
"#,
        )
        .unwrap();

        let added = merge_composer(&config, &manifest).unwrap();
        assert_eq!(added, vec!["guzzlehttp/guzzle"]);

        let doc: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("composer.json")).unwrap()).unwrap();
        assert_eq!(doc["require"]["monolog/monolog"], "^2.0");
        assert_eq!(doc["require"]["guzzlehttp/guzzle"], "^7.0");
        assert_eq!(doc["name"], "acme/site");

        assert!(merge_composer(&config, &manifest).unwrap().is_empty());
    }

    #[test]
    fn test_install_registry() {
        let conn = db::open_in_memory().unwrap();
        let manifest = Manifest::parse(
            r#"
[routes]
"/cart" = "Shop\\Views\\Cart"
"/checkout" = "Shop\\Views\\Checkout"

[themes]
storefront = "views/shop/theme"
"#,
        )
        .unwrap();

        assert_eq!(install_registry(&conn, "shop", &manifest).unwrap(), 3);
        assert_eq!(RegistryEntry::count_for(&conn, "shop").unwrap(), 3);
        // upserts, so a reinstall does not duplicate
        install_registry(&conn, "shop", &manifest).unwrap();
        assert_eq!(RegistryEntry::count_for(&conn, "shop").unwrap(), 3);
    }

    #[test]
    fn test_rescan_class_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        write(dir.path(), "src/Shop/Cart.php", "<?php");
        write(dir.path(), "src/Shop/Models/Order.php", "<?php");
        write(dir.path(), "src/Shop/readme.txt", "skip");

        assert_eq!(rescan_class_index(&config).unwrap(), 2);
        let index: BTreeMap<String, String> = serde_json::from_str(
            &fs::read_to_string(dir.path().join(".apex/class_index.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(index["App\\Shop\\Models\\Order"], "src/Shop/Models/Order.php");
    }
}
