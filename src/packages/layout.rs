// src/packages/layout.rs

//! Mapping between the SVN-relative layout of a package and where its files
//! live inside an Apex project.
//!
//! | SVN path        | Project path           |
//! |-----------------|------------------------|
//! | `src/...`       | `src/{Class}/...`      |
//! | `etc/...`       | `etc/{Class}/...`      |
//! | `tests/...`     | `tests/{Class}/...`    |
//! | `docs/...`      | `docs/{alias}/...`     |
//! | `views/...`     | `views/{alias}/...`    |
//! | `ext/...`       | `...` (registered external files) |

/// Top-level directories of the SVN layout
pub const MANAGED_DIRS: [&str; 5] = ["src", "etc", "tests", "docs", "views"];

/// Prefix under which explicitly added external files are stored
pub const EXTERNAL_DIR: &str = "ext";

/// Normalize separators and strip leading `/` and `./`
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// `my-shop` -> `MyShop`
pub fn class_name(alias: &str) -> String {
    alias
        .split(['-', '_'])
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Converts between SVN-relative and project-relative paths for one package
#[derive(Debug, Clone)]
pub struct PathConverter {
    alias: String,
    class_name: String,
}

impl PathConverter {
    pub fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            class_name: class_name(alias),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Project-relative directory backing a managed SVN directory
    pub fn local_dir(&self, svn_dir: &str) -> Option<String> {
        match svn_dir {
            "src" | "etc" | "tests" => Some(format!("{}/{}", svn_dir, self.class_name)),
            "docs" | "views" => Some(format!("{}/{}", svn_dir, self.alias)),
            _ => None,
        }
    }

    /// Convert an SVN-relative path to a project-relative path
    ///
    /// Returns None for paths outside the managed layout or paths that try to
    /// escape the project root.
    pub fn to_local(&self, svn_path: &str) -> Option<String> {
        let path = normalize_path(svn_path);
        if path.split('/').any(|seg| seg == "..") {
            return None;
        }

        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, rest),
            None => return None,
        };

        if head == EXTERNAL_DIR {
            return Some(rest.to_string());
        }

        self.local_dir(head).map(|dir| format!("{}/{}", dir, rest))
    }

    /// Convert a project-relative path to its SVN-relative path
    ///
    /// Paths outside the package's managed directories are treated as
    /// external files.
    pub fn to_svn(&self, local_path: &str) -> Option<String> {
        let path = normalize_path(local_path);
        if path.is_empty() || path.split('/').any(|seg| seg == "..") {
            return None;
        }

        for svn_dir in MANAGED_DIRS {
            if let Some(dir) = self.local_dir(svn_dir) {
                if let Some(rest) = path.strip_prefix(&format!("{}/", dir)) {
                    return Some(format!("{}/{}", svn_dir, rest));
                }
            }
        }

        Some(format!("{}/{}", EXTERNAL_DIR, path))
    }
}
