// tests/integration_test.rs

//! Integration tests for Apex package tooling
//!
//! These run checkout, commit, release, install, upgrade and rollback end to
//! end against the in-memory version-control backend.

use apex_pkg::config::Config;
use apex_pkg::db::models::{InstalledMigration, LocalPackage, PackageType, Repository};
use apex_pkg::db;
use apex_pkg::hooks::{ComponentKind, HookRegistry, PackageHook};
use apex_pkg::integrity::certs::{CertName, CertStore};
use apex_pkg::integrity::inventory::{Inventory, hash_bytes};
use apex_pkg::integrity::merkle::MerkleTreeBuilder;
use apex_pkg::integrity::signing::PackageSigner;
use apex_pkg::operator::{Operator, ScriptedOperator};
use apex_pkg::packages::VersionConstraint;
use apex_pkg::repository::{self, OfflineApi};
use apex_pkg::rollback::Restorer;
use apex_pkg::svn::inventory::ConflictPolicy;
use apex_pkg::svn::memory::MemoryBackend;
use apex_pkg::svn::transport::CommitMessage;
use apex_pkg::svn::{
    CheckoutOutcome, Context, InstallOptions, SvnCheckout, SvnCommit, SvnInstall, SvnRelease,
    SvnUpgrade, UpgradeOptions, UpgradeOutcome,
};
use apex_pkg::Error;
use rusqlite::Connection;
use sequoia_openpgp::cert::{CertBuilder, CipherSuite};
use sequoia_openpgp::serialize::SerializeInto;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const HOST: &str = "repo.test";

/// A project root with its own database, sharing a repository backend
struct Project {
    _dir: TempDir,
    config: Config,
    conn: Connection,
    backend: Arc<MemoryBackend>,
    api: OfflineApi,
    hooks: HookRegistry,
    repo: Repository,
}

impl Project {
    fn new(backend: Arc<MemoryBackend>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.ssh_key = None;

        db::init(&config.db_path_str()).unwrap();
        let conn = db::open(&config.db_path_str()).unwrap();
        let repo = repository::add_repository(&conn, "main", HOST, None, None).unwrap();

        Self {
            _dir: dir,
            config,
            conn,
            backend,
            api: OfflineApi::new(),
            hooks: HookRegistry::new(),
            repo,
        }
    }

    fn context<'a>(&'a self, operator: &'a mut dyn Operator) -> Context<'a> {
        Context {
            config: &self.config,
            conn: &self.conn,
            backend: self.backend.clone(),
            api: &self.api,
            operator,
            hooks: &self.hooks,
        }
    }

    fn install(
        &self,
        serial: &str,
        options: &InstallOptions,
        operator: &mut ScriptedOperator,
    ) -> apex_pkg::Result<apex_pkg::svn::InstallReport> {
        let mut ctx = self.context(operator);
        SvnInstall::process(&mut ctx, &self.repo, serial, options)
    }

    fn upgrade(
        &self,
        alias: &str,
        options: UpgradeOptions,
        operator: &mut ScriptedOperator,
    ) -> apex_pkg::Result<UpgradeOutcome> {
        let mut ctx = self.context(operator);
        SvnUpgrade::process(&mut ctx, alias, options)
    }

    fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.config.root.join(rel)).ok()
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.config.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// The publisher `jsmith`: owns a signing key for repository `main`
struct Publisher {
    signer: PackageSigner,
    armored: String,
    cert: sequoia_openpgp::Cert,
}

impl Publisher {
    fn new() -> Self {
        let (cert, _) = CertBuilder::general_purpose(None::<CipherSuite>, Some("jsmith"))
            .generate()
            .unwrap();
        let signer = PackageSigner::unlock(&cert, None).unwrap();
        let armored = String::from_utf8(cert.armored().to_vec().unwrap()).unwrap();
        Self {
            signer,
            armored,
            cert,
        }
    }

    /// Give `project` the publisher's secret key, as on the author's machine
    fn install_key(&self, project: &Project) {
        CertStore::new(project.config.certs_dir())
            .save_secret(&CertName::for_publisher("jsmith", "main"), &self.cert)
            .unwrap();
    }

    /// Let `project` fetch the public certificate from its repository API
    fn announce(&self, project: &Project) {
        project.api.publish_certificate("jsmith", &self.armored);
    }

    /// Place `files` under `dir` of `serial` and sign them; returns the merkle root
    fn publish(
        &self,
        backend: &MemoryBackend,
        serial: &str,
        dir: &str,
        files: &[(&str, &str)],
        prev: Option<&str>,
    ) -> String {
        let base = format!("svn://{}/{}/{}", HOST, serial, dir);
        let mut inventory = Inventory::new();
        for (path, content) in files {
            backend.put_file(&format!("{}/{}", base, path), content.as_bytes());
            inventory.insert(path, hash_bytes(content.as_bytes()));
        }

        let tree = MerkleTreeBuilder::build(serial, &inventory, prev);
        backend.set_prop(&base, "merkle_root", &tree.merkle_root);
        if let Some(prev) = prev {
            backend.set_prop(&base, "prev_merkle_root", prev);
        }
        backend.set_prop(&base, "inventory", &inventory.to_json().unwrap());
        backend.set_prop(
            &base,
            "signature",
            &self.signer.sign(tree.merkle_root.as_bytes()).unwrap(),
        );
        backend.set_prop(&base, "signed_by", "jsmith");
        tree.merkle_root
    }
}

fn setup() -> (Arc<MemoryBackend>, Publisher, Project) {
    let backend = Arc::new(MemoryBackend::new());
    let publisher = Publisher::new();
    let project = Project::new(backend.clone());
    publisher.announce(&project);
    (backend, publisher, project)
}

fn exact(version: &str) -> InstallOptions {
    InstallOptions {
        version: VersionConstraint::Exact(version.to_string()),
        ..Default::default()
    }
}

fn exports_of(backend: &MemoryBackend, serial: &str) -> usize {
    backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("export ") && c.contains(&format!("/{}/", serial)))
        .count()
}

#[test]
fn test_database_lifecycle() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("nested/.apex/apex.db")
        .to_str()
        .unwrap()
        .to_string();

    assert!(db::init(&db_path).is_ok(), "Should create parent directories");
    let conn = db::open(&db_path).unwrap();
    let result: Result<i32, _> = conn.query_row("SELECT 1", [], |row| row.get(0));
    assert_eq!(result.unwrap(), 1, "Should be able to execute queries");

    let missing = temp_dir.path().join("missing.db");
    assert!(matches!(
        db::open(missing.to_str().unwrap()),
        Err(Error::DatabaseNotFound(_))
    ));
}

#[test]
fn test_fresh_install_resolves_latest_release() {
    let (backend, publisher, project) = setup();
    for version in ["1.0.0", "1.1.0", "1.2.0"] {
        publisher.publish(
            &backend,
            "jsmith/shop",
            &format!("tags/{}", version),
            &[("src/Cart.php", version), ("views/cart.html", "<cart/>")],
            None,
        );
    }

    let mut operator = ScriptedOperator::new();
    let report = project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();

    assert_eq!(report.version, "1.2.0");
    assert_eq!(report.signer.unwrap().subject, "jsmith");
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("1.2.0"));
    assert_eq!(project.read("views/shop/cart.html").as_deref(), Some("<cart/>"));

    let package = LocalPackage::get(&project.conn, "shop").unwrap();
    assert_eq!(package.version(), "1.2.0");
    assert_eq!(package.serial(), "jsmith/shop");

    // Installing again is refused rather than silently repeated
    assert!(matches!(
        project.install("jsmith/shop", &InstallOptions::default(), &mut operator),
        Err(Error::AlreadyExists(_))
    ));
}

#[test]
fn test_upgrade_with_no_newer_release() {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/shop", "tags/1.2.0", &[("src/Cart.php", "v12")], None);

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();

    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut operator)
        .unwrap();
    assert_eq!(
        outcome,
        UpgradeOutcome::NoUpgrades {
            version: "1.2.0".to_string()
        }
    );
    assert_eq!(backend.count_calls("diff_summarize"), 0);
}

#[test]
fn test_install_rejects_tampered_release() {
    let (backend, publisher, project) = setup();
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "genuine"), ("src/Order.php", "order")],
        None,
    );
    backend.put_file("svn://repo.test/jsmith/shop/tags/1.0.0/src/Cart.php", b"tampered");

    let mut operator = ScriptedOperator::new();
    let result = project.install("jsmith/shop", &InstallOptions::default(), &mut operator);

    assert!(matches!(result, Err(Error::IntegrityFailure(_))));
    assert!(project.read("src/Shop/Cart.php").is_none());
    assert!(project.read("src/Shop/Order.php").is_none());
    assert!(!LocalPackage::exists(&project.conn, "shop").unwrap());
}

#[test]
fn test_noverify_installs_and_warns() {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "genuine")], None);
    backend.put_file("svn://repo.test/jsmith/shop/tags/1.0.0/src/Cart.php", b"tampered");

    let mut operator = ScriptedOperator::new();
    let options = InstallOptions {
        noverify: true,
        ..Default::default()
    };
    let report = project.install("jsmith/shop", &options, &mut operator).unwrap();

    assert!(report.signer.is_none());
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("tampered"));
    assert!(
        operator
            .notices()
            .iter()
            .any(|n| n.starts_with("WARNING") && n.contains("--noverify"))
    );
}

#[test]
fn test_installed_dependency_is_not_exported_again() {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/users", "tags/1.0.0", &[("src/User.php", "user")], None);
    let manifest = "[package]\nversion = \"1.0.0\"\n\n[dependencies]\n\"jsmith/users\" = \"latest\"\n";
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "cart"), ("etc/package.toml", manifest)],
        None,
    );
    publisher.publish(
        &backend,
        "jsmith/blog",
        "tags/1.0.0",
        &[("src/Post.php", "post"), ("etc/package.toml", manifest)],
        None,
    );

    let mut operator = ScriptedOperator::new();
    let shop = project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();
    assert_eq!(shop.dependencies, vec!["jsmith/users".to_string()]);
    assert_eq!(project.read("src/Users/User.php").as_deref(), Some("user"));
    assert_eq!(exports_of(&backend, "jsmith/users"), 1);

    let blog = project
        .install("jsmith/blog", &InstallOptions::default(), &mut operator)
        .unwrap();
    assert!(blog.dependencies.is_empty());
    assert_eq!(exports_of(&backend, "jsmith/users"), 1);
}

#[test]
fn test_dependency_without_read_access_fails_install() {
    let (backend, publisher, project) = setup();
    let manifest = "[dependencies]\n\"acme/billing\" = \"1.0.0\"\n";
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "cart"), ("etc/package.toml", manifest)],
        None,
    );
    project.api.register(
        "acme/billing",
        repository::RepoAccess {
            exists: true,
            can_read: false,
            can_write: false,
            license: None,
        },
    );

    let mut operator = ScriptedOperator::new();
    let result = project.install("jsmith/shop", &InstallOptions::default(), &mut operator);
    assert!(matches!(result, Err(Error::Dependency(_))));
    assert!(!LocalPackage::exists(&project.conn, "shop").unwrap());
}

#[test]
fn test_unreadable_dependency_leaves_earlier_ones_uninstalled() {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/users", "tags/1.0.0", &[("src/User.php", "user")], None);
    let manifest = "[dependencies]\n\"jsmith/users\" = \"latest\"\n\"zzz/billing\" = \"1.0.0\"\n";
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "cart"), ("etc/package.toml", manifest)],
        None,
    );
    project.api.register(
        "zzz/billing",
        repository::RepoAccess {
            exists: true,
            can_read: false,
            can_write: false,
            license: None,
        },
    );

    let mut operator = ScriptedOperator::new();
    let result = project.install("jsmith/shop", &InstallOptions::default(), &mut operator);
    assert!(matches!(result, Err(Error::Dependency(_))));

    // users was resolved before billing failed, but never written
    assert_eq!(exports_of(&backend, "jsmith/users"), 1);
    assert!(!LocalPackage::exists(&project.conn, "users").unwrap());
    assert!(!LocalPackage::exists(&project.conn, "shop").unwrap());
    assert!(project.read("src/Users/User.php").is_none());
    assert!(project.read("src/Shop/Cart.php").is_none());
}

struct FailingInstallHook;

impl PackageHook for FailingInstallHook {
    fn after_install(&self, alias: &str, _root: &Path) -> apex_pkg::Result<()> {
        Err(Error::InitError(format!("{} refused to start", alias)))
    }
}

#[test]
fn test_failed_install_hook_undoes_the_whole_set() {
    let (backend, publisher, mut project) = setup();
    publisher.publish(
        &backend,
        "jsmith/users",
        "tags/1.0.0",
        &[("src/User.php", "user"), ("etc/migrations/001_init.sql", "CREATE TABLE users (id INT);")],
        None,
    );
    let manifest = "[dependencies]\n\"jsmith/users\" = \"latest\"\n\n[composer]\n\"monolog/monolog\" = \"^3.0\"\n";
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "cart"), ("etc/package.toml", manifest)],
        None,
    );
    let composer = "{\n  \"require\": {}\n}\n";
    project.write("composer.json", composer);
    project
        .hooks
        .register("shop", ComponentKind::InstallHook, || Box::new(FailingInstallHook));

    let mut operator = ScriptedOperator::new();
    let result = project.install("jsmith/shop", &InstallOptions::default(), &mut operator);
    assert!(matches!(result, Err(Error::InitError(_))));

    assert!(!LocalPackage::exists(&project.conn, "users").unwrap());
    assert!(!LocalPackage::exists(&project.conn, "shop").unwrap());
    assert!(InstalledMigration::keys_for(&project.conn, "users").unwrap().is_empty());
    assert!(project.read("src/Users/User.php").is_none());
    assert!(project.read("src/Shop/Cart.php").is_none());
    assert!(!project.config.root.join("etc/Users").exists());
    assert_eq!(project.read("composer.json").as_deref(), Some(composer));
}

#[test]
fn test_dependency_cycle_installs_each_package_once() {
    let (backend, publisher, project) = setup();
    let needs_users = "[dependencies]\n\"jsmith/users\" = \"latest\"\n";
    let needs_shop = "[dependencies]\n\"jsmith/shop\" = \"latest\"\n";
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "cart"), ("etc/package.toml", needs_users)],
        None,
    );
    publisher.publish(
        &backend,
        "jsmith/users",
        "tags/1.0.0",
        &[("src/User.php", "user"), ("etc/package.toml", needs_shop)],
        None,
    );

    let mut operator = ScriptedOperator::new();
    let report = project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();
    assert_eq!(report.dependencies, vec!["jsmith/users".to_string()]);
    assert!(LocalPackage::exists(&project.conn, "shop").unwrap());
    assert!(LocalPackage::exists(&project.conn, "users").unwrap());
    assert_eq!(exports_of(&backend, "jsmith/shop"), 1);
    assert_eq!(exports_of(&backend, "jsmith/users"), 1);
}

#[test]
fn test_dependency_chain_deeper_than_limit_fails() {
    let (backend, publisher, mut project) = setup();
    project.config.max_dependency_depth = 1;
    let dep = |serial: &str| format!("[dependencies]\n\"{}\" = \"latest\"\n", serial);
    let shop_manifest = dep("jsmith/users");
    let users_manifest = dep("jsmith/roles");
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "cart"), ("etc/package.toml", shop_manifest.as_str())],
        None,
    );
    publisher.publish(
        &backend,
        "jsmith/users",
        "tags/1.0.0",
        &[("src/User.php", "user"), ("etc/package.toml", users_manifest.as_str())],
        None,
    );
    publisher.publish(&backend, "jsmith/roles", "tags/1.0.0", &[("src/Role.php", "role")], None);

    let mut operator = ScriptedOperator::new();
    let result = project.install("jsmith/shop", &InstallOptions::default(), &mut operator);
    match result {
        Err(Error::Dependency(message)) => assert!(message.contains("deeper than 1")),
        other => panic!("expected a dependency error, got {:?}", other.map(|r| r.serial)),
    }
    assert_eq!(exports_of(&backend, "jsmith/roles"), 0);
    assert!(!LocalPackage::exists(&project.conn, "users").unwrap());
    assert!(project.read("src/Users/User.php").is_none());

    // one level more lets the chain through
    project.config.max_dependency_depth = 2;
    let report = project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();
    assert_eq!(
        report.dependencies,
        vec!["jsmith/roles".to_string(), "jsmith/users".to_string()]
    );
    assert_eq!(project.read("src/Roles/Role.php").as_deref(), Some("role"));
}

#[test]
fn test_upgrade_downloads_only_changed_files() {
    let (backend, publisher, project) = setup();
    let names: Vec<String> = (0..50).map(|i| format!("src/File{:02}.php", i)).collect();

    let v1: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "one")).collect();
    let root = publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &v1, None);

    let mut v2 = v1.clone();
    v2[3].1 = "two";
    v2[41].1 = "two";
    publisher.publish(&backend, "jsmith/shop", "tags/1.1.0", &v2, Some(&root));

    let mut operator = ScriptedOperator::new();
    project.install("jsmith/shop", &exact("1.0.0"), &mut operator).unwrap();

    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut operator)
        .unwrap();
    let UpgradeOutcome::Upgraded {
        from,
        to,
        updated,
        deleted,
        verified,
        ..
    } = outcome
    else {
        panic!("expected an upgrade, got {:?}", outcome);
    };
    assert_eq!((from.as_str(), to.as_str()), ("1.0.0", "1.1.0"));
    assert_eq!((updated, deleted), (2, 0));
    assert!(verified);

    let downloads = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("cat ") && c.contains("tags/1.1.0"))
        .count();
    assert_eq!(downloads, 2);
    assert_eq!(project.read("src/Shop/File03.php").as_deref(), Some("two"));
    assert_eq!(project.read("src/Shop/File04.php").as_deref(), Some("one"));
    assert_eq!(LocalPackage::get(&project.conn, "shop").unwrap().version(), "1.1.0");
}

#[test]
fn test_upgrade_rejects_tampered_diff() {
    let (backend, publisher, project) = setup();
    let root = publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "v1")], None);
    publisher.publish(&backend, "jsmith/shop", "tags/1.1.0", &[("src/Cart.php", "v2")], Some(&root));

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &exact("1.0.0"), &mut operator)
        .unwrap();
    backend.put_file("svn://repo.test/jsmith/shop/tags/1.1.0/src/Cart.php", b"evil");

    let result = project.upgrade("shop", UpgradeOptions::default(), &mut operator);
    assert!(matches!(result, Err(Error::IntegrityFailure(_))));
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("v1"));
    assert_eq!(LocalPackage::get(&project.conn, "shop").unwrap().version(), "1.0.0");
}

#[test]
fn test_upgrade_never_writes_into_apex_dir() {
    let (backend, publisher, project) = setup();
    let root = publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "v1")], None);
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.1.0",
        &[
            ("src/Cart.php", "v2"),
            ("ext/.apex/certs/victim.apex.main.crt", "planted"),
            ("ext/.apex/upgrades/installs.json", "{}"),
        ],
        Some(&root),
    );

    let mut operator = ScriptedOperator::new();
    project.install("jsmith/shop", &exact("1.0.0"), &mut operator).unwrap();
    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut operator)
        .unwrap();
    assert!(matches!(outcome, UpgradeOutcome::Upgraded { .. }));

    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("v2"));
    assert!(project.read(".apex/certs/victim.apex.main.crt").is_none());
    let restorer = Restorer::new(&project.config, &project.conn, &project.hooks);
    assert_eq!(restorer.log().unwrap().entries.len(), 1);
}

#[test]
fn test_breaking_release_needs_confirmation() {
    let (backend, publisher, project) = setup();
    let root = publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "v1")], None);
    publisher.publish(&backend, "jsmith/shop", "tags/2.0.0", &[("src/Cart.php", "v2")], Some(&root));
    backend.set_prop("svn://repo.test/jsmith/shop/tags/2.0.0", "is_breaking", "1");

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &exact("1.0.0"), &mut operator)
        .unwrap();

    let mut decline = ScriptedOperator::new().with_confirm(false);
    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut decline)
        .unwrap();
    assert_eq!(
        outcome,
        UpgradeOutcome::Declined {
            breaking: vec!["2.0.0".to_string()]
        }
    );
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("v1"));
    assert_eq!(backend.count_calls("diff_summarize"), 0);

    let mut accept = ScriptedOperator::new().with_confirm(true);
    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut accept)
        .unwrap();
    assert!(matches!(outcome, UpgradeOutcome::Upgraded { ref to, .. } if to == "2.0.0"));
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("v2"));
}

#[test]
fn test_rollback_restores_previous_files() {
    let (backend, publisher, project) = setup();
    let root = publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/Cart.php", "v1"), ("src/Old.php", "old")],
        None,
    );
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.1.0",
        &[("src/Cart.php", "v2"), ("src/New.php", "new")],
        Some(&root),
    );

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &exact("1.0.0"), &mut operator)
        .unwrap();
    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut operator)
        .unwrap();
    let UpgradeOutcome::Upgraded { transaction, .. } = outcome else {
        panic!("expected an upgrade");
    };
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("v2"));
    assert_eq!(project.read("src/Shop/New.php").as_deref(), Some("new"));
    assert!(project.read("src/Shop/Old.php").is_none());

    let restorer = Restorer::new(&project.config, &project.conn, &project.hooks);
    let report = restorer.rollback_latest().unwrap().unwrap();
    assert_eq!(report.transaction, transaction);
    assert_eq!(report.packages, vec![("shop".to_string(), "1.0.0".to_string())]);

    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("v1"));
    assert_eq!(project.read("src/Shop/Old.php").as_deref(), Some("old"));
    assert!(project.read("src/Shop/New.php").is_none());
    assert_eq!(LocalPackage::get(&project.conn, "shop").unwrap().version(), "1.0.0");
    assert!(restorer.log().unwrap().entries.is_empty());
    assert!(restorer.rollback_latest().unwrap().is_none());
}

#[test]
fn test_retry_after_failed_upgrade_still_rolls_back() {
    let (backend, publisher, project) = setup();
    let root = publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.0.0",
        &[("src/A.php", "A1"), ("src/B.php", "B1")],
        None,
    );
    publisher.publish(
        &backend,
        "jsmith/shop",
        "tags/1.1.0",
        &[("src/A.php", "A2"), ("src/B.php", "B2")],
        Some(&root),
    );

    let mut operator = ScriptedOperator::new();
    project.install("jsmith/shop", &exact("1.0.0"), &mut operator).unwrap();

    // B.php cannot be written while a directory stands in its place
    let b = project.config.root.join("src/Shop/B.php");
    fs::remove_file(&b).unwrap();
    fs::create_dir_all(b.join("blocker")).unwrap();
    assert!(project.upgrade("shop", UpgradeOptions::default(), &mut operator).is_err());
    assert_eq!(LocalPackage::get(&project.conn, "shop").unwrap().version(), "1.0.0");

    fs::remove_dir_all(&b).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let outcome = project
        .upgrade("shop", UpgradeOptions::default(), &mut operator)
        .unwrap();
    assert!(matches!(outcome, UpgradeOutcome::Upgraded { .. }));
    assert_eq!(project.read("src/Shop/A.php").as_deref(), Some("A2"));

    let restorer = Restorer::new(&project.config, &project.conn, &project.hooks);
    assert_eq!(restorer.log().unwrap().entries.len(), 2);
    restorer.rollback_latest().unwrap().unwrap();
    restorer.rollback_latest().unwrap().unwrap();

    assert_eq!(project.read("src/Shop/A.php").as_deref(), Some("A1"));
    assert_eq!(LocalPackage::get(&project.conn, "shop").unwrap().version(), "1.0.0");
    assert!(restorer.log().unwrap().entries.is_empty());
}

#[test]
fn test_checkout_cancel_changes_nothing() {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "v1")], None);
    publisher.publish(&backend, "jsmith/shop", "trunk", &[("src/Cart.php", "remote")], None);

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();
    project.write("src/Shop/Cart.php", "local edit");
    let before = LocalPackage::get(&project.conn, "shop").unwrap();

    let mut cancel = ScriptedOperator::new().with_policy(ConflictPolicy::Cancel);
    let mut ctx = project.context(&mut cancel);
    let outcome = SvnCheckout::process(&mut ctx, &project.repo, "jsmith/shop", None).unwrap();
    drop(ctx);

    assert_eq!(outcome, CheckoutOutcome::Cancelled { divergent: 1 });
    assert_eq!(cancel.policy_requests(), 1);
    assert_eq!(backend.count_calls("checkout"), 0);
    assert!(!project.config.working_copy("shop").exists());
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("local edit"));

    let after = LocalPackage::get(&project.conn, "shop").unwrap();
    assert_eq!(after.version(), before.version());
    assert_eq!(after.synced_merkle_root(), before.synced_merkle_root());
}

/// `jsmith/shop` 1.0.0 installed, trunk moved on to `remote`, Cart edited locally
fn diverged_checkout() -> (Arc<MemoryBackend>, Publisher, Project) {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "v1")], None);
    publisher.publish(&backend, "jsmith/shop", "trunk", &[("src/Cart.php", "remote")], None);

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();
    project.write("src/Shop/Cart.php", "local edit");
    (backend, publisher, project)
}

#[test]
fn test_checkout_use_local_keeps_project_files() {
    let (backend, _publisher, project) = diverged_checkout();

    let mut operator = ScriptedOperator::new().with_policy(ConflictPolicy::UseLocal);
    let mut ctx = project.context(&mut operator);
    let outcome = SvnCheckout::process(&mut ctx, &project.repo, "jsmith/shop", None).unwrap();
    drop(ctx);

    assert!(matches!(outcome, CheckoutOutcome::CheckedOut { policy: ConflictPolicy::UseLocal, .. }));
    assert_eq!(operator.policy_requests(), 1);
    assert_eq!(backend.count_calls("checkout"), 1);
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("local edit"));
    let wc = project.config.working_copy("shop");
    assert_eq!(fs::read_to_string(wc.join("src/Cart.php")).unwrap(), "local edit");
}

#[test]
fn test_checkout_rename_keeps_local_copy_aside() {
    let (_backend, _publisher, project) = diverged_checkout();

    let mut operator = ScriptedOperator::new().with_policy(ConflictPolicy::Rename);
    let mut ctx = project.context(&mut operator);
    let outcome = SvnCheckout::process(&mut ctx, &project.repo, "jsmith/shop", None).unwrap();
    drop(ctx);

    assert!(matches!(outcome, CheckoutOutcome::CheckedOut { policy: ConflictPolicy::Rename, .. }));
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("remote"));
    assert_eq!(project.read("src/Shop/Cart.php.local").as_deref(), Some("local edit"));
}

#[test]
fn test_checkout_in_sync_asks_nothing() {
    let (backend, publisher, project) = setup();
    publisher.publish(&backend, "jsmith/shop", "tags/1.0.0", &[("src/Cart.php", "same")], None);
    let trunk_root = publisher.publish(&backend, "jsmith/shop", "trunk", &[("src/Cart.php", "same")], None);

    let mut operator = ScriptedOperator::new();
    project
        .install("jsmith/shop", &InstallOptions::default(), &mut operator)
        .unwrap();

    let mut cancel = ScriptedOperator::new().with_policy(ConflictPolicy::Cancel);
    let mut ctx = project.context(&mut cancel);
    let outcome = SvnCheckout::process(&mut ctx, &project.repo, "jsmith/shop", None).unwrap();
    drop(ctx);

    assert!(matches!(outcome, CheckoutOutcome::CheckedOut { policy: ConflictPolicy::UseRemote, .. }));
    assert_eq!(cancel.policy_requests(), 0);
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("same"));
    let package = LocalPackage::get(&project.conn, "shop").unwrap();
    assert_eq!(package.synced_merkle_root(), Some(trunk_root.as_str()));
    assert_eq!(package.version(), "1.0.0");
}

#[test]
fn test_commit_refuses_stale_working_copy() {
    let (backend, publisher, project) = setup();
    publisher.install_key(&project);
    publisher.publish(&backend, "jsmith/shop", "trunk", &[("src/Cart.php", "remote")], None);

    let mut operator = ScriptedOperator::new();
    let mut ctx = project.context(&mut operator);
    let outcome = SvnCheckout::process(&mut ctx, &project.repo, "jsmith/shop", None).unwrap();
    assert!(matches!(outcome, CheckoutOutcome::CheckedOut { policy: ConflictPolicy::UseRemote, .. }));
    drop(ctx);
    assert_eq!(project.read("src/Shop/Cart.php").as_deref(), Some("remote"));

    // Someone else commits in the meantime
    backend.set_prop("svn://repo.test/jsmith/shop/trunk", "merkle_root", "f00d");
    project.write("src/Shop/Cart.php", "mine");

    let mut ctx = project.context(&mut operator);
    let result = SvnCommit::process(&mut ctx, "shop", &CommitMessage::Text("edit".into()));
    assert!(matches!(result, Err(Error::StaleWorkingCopy(_))));
    assert_eq!(backend.count_calls("commit"), 0);
    assert_eq!(
        backend.file("svn://repo.test/jsmith/shop/trunk/src/Cart.php").unwrap(),
        b"remote"
    );
}

#[test]
fn test_commit_release_install_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let publisher = Publisher::new();

    let author = Project::new(backend.clone());
    publisher.install_key(&author);
    let draft = SvnCommit::create(&author.conn, &author.repo, "drafts/blog", PackageType::Package).unwrap();
    assert!(draft.is_local);
    // re-target before publishing
    let package = SvnCommit::create(&author.conn, &author.repo, "jsmith/blog", PackageType::Package).unwrap();
    assert_eq!(package.serial(), "jsmith/blog");
    assert!(package.is_local);
    author.write("src/Blog/Post.php", "<?php class Post {}");
    author.write("etc/Blog/package.toml", "[package]\nversion = \"1.0.0\"\n");

    let mut operator = ScriptedOperator::new();
    let mut ctx = author.context(&mut operator);
    let report = SvnCommit::process(&mut ctx, "blog", &CommitMessage::Text("Initial".into())).unwrap();
    assert!(report.first_commit);
    assert!(report.revision.is_some());
    assert_eq!(report.added, 2);
    assert!(!LocalPackage::get(&author.conn, "blog").unwrap().is_local);
    assert!(matches!(
        SvnCommit::create(&author.conn, &author.repo, "jsmith/blog", PackageType::Package),
        Err(Error::AlreadyExists(_))
    ));

    // Nothing changed since: the second commit is a no-op
    let again = SvnCommit::process(&mut ctx, "blog", &CommitMessage::Text("Again".into())).unwrap();
    assert!(again.revision.is_none());

    let version = SvnRelease::process(&mut ctx, "blog", None, false).unwrap();
    assert_eq!(version, "1.0.0");
    assert!(matches!(
        SvnRelease::process(&mut ctx, "blog", Some("v1.0.0"), false),
        Err(Error::AlreadyExists(_))
    ));
    drop(ctx);
    assert!(author.api.calls().iter().any(|c| c == "create jsmith/blog"));

    // A second deployment installs the release and verifies it against the
    // certificate published on the repository
    let consumer = Project::new(backend.clone());
    publisher.announce(&consumer);
    let report = consumer
        .install("jsmith/blog", &InstallOptions::default(), &mut operator)
        .unwrap();
    assert_eq!(report.version, "1.0.0");
    assert_eq!(report.signer.unwrap().subject, "jsmith");
    assert_eq!(
        consumer.read("src/Blog/Post.php").as_deref(),
        Some("<?php class Post {}")
    );
    assert!(
        CertStore::new(consumer.config.certs_dir())
            .public(&CertName::for_publisher("jsmith", "main"))
            .unwrap()
            .into_option()
            .is_some()
    );
}
