// src/main.rs

use anyhow::{Result, anyhow};
use apex_pkg::config::{Config, InstanceRole};
use apex_pkg::db::models::{LocalPackage, PackageType, Repository};
use apex_pkg::hooks::HookRegistry;
use apex_pkg::operator::{Operator, ScriptedOperator, TerminalOperator};
use apex_pkg::packages::VersionConstraint;
use apex_pkg::repository;
use apex_pkg::rollback::Restorer;
use apex_pkg::svn::shell::ShellBackend;
use apex_pkg::svn::transport::{CommitMessage, VcsBackend};
use apex_pkg::svn::{
    CheckoutOutcome, Context, InstallOptions, SvnCheckout, SvnCommit, SvnInstall, SvnRelease,
    SvnUpgrade, UpgradeOptions, UpgradeOutcome, parse_serial,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use rusqlite::Connection;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "apex")]
#[command(author, version, about = "Package versioning, distribution and upgrades for Apex", long_about = None)]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Database path (default: <root>/.apex/apex.db)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// svn binary to invoke
    #[arg(long, global = true, default_value = "svn")]
    svn_bin: String,

    /// SSH private key for svn+ssh access (default: ~/.ssh/id_rsa)
    #[arg(long, global = true)]
    ssh_key: Option<PathBuf>,

    /// Account used to authenticate against the repository API
    #[arg(long, global = true)]
    account: Option<String>,

    /// This instance replicates a master's database; skip migrations
    #[arg(long, global = true)]
    slave: bool,

    /// Do not verify signatures of upgrade diffs
    #[arg(long, global = true)]
    no_upgrade_verify: bool,

    /// Answer yes to every question
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Apex package database
    Init,
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Manage packages
    Package {
        #[command(subcommand)]
        command: PackageCommands,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Add a repository
    Add {
        /// Repository alias
        alias: String,
        /// SVN host
        host: String,
        /// Base URL of the JSON API (default: https://<host>/api/)
        #[arg(long)]
        api_url: Option<String>,
        /// Path of a repository on this machine, accessed over file://
        #[arg(long)]
        local_path: Option<String>,
    },
    /// List repositories
    List,
    /// Remove a repository
    Remove {
        alias: String,
    },
}

#[derive(Subcommand)]
enum PackageCommands {
    /// Register a new package authored in this project
    Create {
        /// Package as author/alias
        serial: String,
        /// Repository alias (default: the first repository)
        #[arg(long)]
        repo: Option<String>,
        /// package, project or theme
        #[arg(long = "type", default_value = "package")]
        package_type: String,
    },
    /// Check out a package's working copy
    Checkout {
        /// Package as author/alias
        serial: String,
        /// Repository alias (default: the first repository)
        #[arg(long)]
        repo: Option<String>,
        /// Directory to check out (default: trunk)
        #[arg(long)]
        dir: Option<String>,
    },
    /// Compile, sign and commit a package
    Commit {
        alias: String,
        /// Commit message
        #[arg(short, long, conflicts_with = "file")]
        message: Option<String>,
        /// Read the commit message from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Tag trunk as a release
    Release {
        alias: String,
        /// Version to release (default: the manifest version)
        #[arg(long)]
        version: Option<String>,
        /// Flag the release as containing breaking changes
        #[arg(long)]
        breaking: bool,
    },
    /// Install packages
    Install {
        /// Packages as author/alias
        #[arg(required = true)]
        serials: Vec<String>,
        /// Repository alias (default: the first repository)
        #[arg(long)]
        repo: Option<String>,
        /// Install the development head (trunk)
        #[arg(long, conflicts_with = "version")]
        dev: bool,
        /// Install an exact release
        #[arg(long)]
        version: Option<String>,
        /// Skip signature verification
        #[arg(long)]
        noverify: bool,
        /// License id for commercial packages
        #[arg(long)]
        license_id: Option<String>,
    },
    /// Upgrade installed packages to their newest release
    Upgrade {
        /// Package aliases (default: every installed package)
        aliases: Vec<String>,
        /// Accept breaking releases without asking
        #[arg(long)]
        confirm: bool,
        /// Skip signature verification
        #[arg(long)]
        noverify: bool,
    },
    /// Undo upgrades
    ///
    /// Without arguments the newest upgrade is undone. With `alias version`
    /// the upgrade to that version and everything after it are undone.
    Rollback {
        alias: Option<String>,
        #[arg(requires = "alias")]
        version: Option<String>,
        /// Undo every upgrade recorded at or after this transaction
        #[arg(long, conflicts_with = "alias")]
        since: Option<String>,
    },
    /// List installed packages
    List,
}

struct App {
    config: Config,
    conn: Connection,
    backend: Arc<dyn VcsBackend>,
    operator: Box<dyn Operator>,
    hooks: HookRegistry,
    account: Option<String>,
}

impl App {
    fn open(config: Config, yes: bool, account: Option<String>) -> Result<Self> {
        let conn = apex_pkg::db::open(&config.db_path_str())?;
        let backend: Arc<dyn VcsBackend> = Arc::new(
            ShellBackend::new(config.svn_bin.clone(), config.command_timeout)
                .with_ssh_key(config.ssh_key.clone()),
        );
        let operator: Box<dyn Operator> = if yes {
            Box::new(ScriptedOperator::assume_yes())
        } else {
            Box::new(TerminalOperator)
        };

        Ok(Self {
            config,
            conn,
            backend,
            operator,
            hooks: HookRegistry::new(),
            account,
        })
    }

    /// Repository by alias, or the first one configured
    fn repository(&self, alias: Option<&str>) -> Result<Repository> {
        match alias {
            Some(alias) => Ok(Repository::get(&self.conn, alias)?),
            None => Repository::list_all(&self.conn)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("No repositories configured; add one with 'apex repo add'")),
        }
    }

    /// Run `f` with a context bound to `repo`
    fn with_context<T>(
        &mut self,
        repo: &Repository,
        author: &str,
        f: impl FnOnce(&mut Context<'_>) -> apex_pkg::Result<T>,
    ) -> Result<T> {
        let account = self.account.clone().unwrap_or_else(|| author.to_string());
        let api = repository::api_for(repo, &account, self.config.api_key.as_deref())?;
        let mut ctx = Context {
            config: &self.config,
            conn: &self.conn,
            backend: Arc::clone(&self.backend),
            api: api.as_ref(),
            operator: self.operator.as_mut(),
            hooks: &self.hooks,
        };
        Ok(f(&mut ctx)?)
    }

    /// Run `f` with a context bound to the repository `alias` came from
    fn with_package<T>(
        &mut self,
        alias: &str,
        f: impl FnOnce(&mut Context<'_>) -> apex_pkg::Result<T>,
    ) -> Result<T> {
        let package = LocalPackage::get(&self.conn, alias)?;
        let repo = Repository::get(&self.conn, package.repo_alias())?;
        self.with_context(&repo, package.author(), f)
    }
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::new(cli.root.clone()).with_env_secrets();
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    config.svn_bin = cli.svn_bin.clone();
    if cli.ssh_key.is_some() {
        config.ssh_key = cli.ssh_key.clone();
    }
    if cli.slave {
        config.role = InstanceRole::Slave;
    }
    config.verify_upgrades = !cli.no_upgrade_verify;
    config
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli);

    match cli.command {
        Commands::Init => {
            info!("Initializing Apex database at: {}", config.db_path.display());
            apex_pkg::db::init(&config.db_path_str())?;
            for dir in [config.svn_dir(), config.upgrades_dir(), config.certs_dir()] {
                std::fs::create_dir_all(dir)?;
            }
            println!("Database initialized successfully at: {}", config.db_path.display());
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "apex", &mut io::stdout());
            Ok(())
        }
        Commands::Repo { command } => {
            let app = App::open(config, cli.yes, cli.account)?;
            run_repo(&app, command)
        }
        Commands::Package { command } => {
            let mut app = App::open(config, cli.yes, cli.account)?;
            run_package(&mut app, command)
        }
    }
}

fn run_repo(app: &App, command: RepoCommands) -> Result<()> {
    match command {
        RepoCommands::Add {
            alias,
            host,
            api_url,
            local_path,
        } => {
            let repo = repository::add_repository(&app.conn, &alias, &host, api_url, local_path)?;
            println!("Added repository: {} ({})", repo.alias, repo.host);
            println!("  API: {}", repo.api_base());
            if let Some(path) = &repo.local_path {
                println!("  Local path: {}", path);
            }
            Ok(())
        }
        RepoCommands::List => {
            let repos = Repository::list_all(&app.conn)?;
            if repos.is_empty() {
                println!("No repositories configured.");
            } else {
                println!("Repositories:");
                for repo in &repos {
                    print!("  {} {}", repo.alias, repo.host);
                    if let Some(path) = &repo.local_path {
                        print!(" [file://{}]", path);
                    }
                    println!();
                }
            }
            Ok(())
        }
        RepoCommands::Remove { alias } => {
            repository::remove_repository(&app.conn, &alias)?;
            println!("Removed repository: {}", alias);
            Ok(())
        }
    }
}

fn run_package(app: &mut App, command: PackageCommands) -> Result<()> {
    match command {
        PackageCommands::Checkout { serial, repo, dir } => {
            let repo = app.repository(repo.as_deref())?;
            let (author, _) = parse_serial(&serial)?;
            let outcome = app.with_context(&repo, author, |ctx| {
                SvnCheckout::process(ctx, &repo, &serial, dir.as_deref())
            })?;
            match outcome {
                CheckoutOutcome::CheckedOut { entries, policy } => {
                    println!("Checked out {} ({} entries, {})", serial, entries, policy);
                }
                CheckoutOutcome::Cancelled { divergent } => {
                    println!("{} files differ; nothing was changed.", divergent);
                    println!("Ok, goodbye");
                }
            }
            Ok(())
        }
        PackageCommands::Create {
            serial,
            repo,
            package_type,
        } => {
            let repo = app.repository(repo.as_deref())?;
            let package_type = package_type.parse::<PackageType>().map_err(|e| anyhow!(e))?;
            let package = SvnCommit::create(&app.conn, &repo, &serial, package_type)?;
            println!("Created {} on {} (unpublished)", package.serial(), package.repo_alias());
            println!("  Commit it to publish: apex package commit {}", package.alias);
            Ok(())
        }
        PackageCommands::Commit {
            alias,
            message,
            file,
        } => {
            let message = match (message, file) {
                (Some(text), _) => CommitMessage::Text(text),
                (None, Some(path)) => CommitMessage::File(path),
                (None, None) => return Err(anyhow!("A commit message is required (-m or --file)")),
            };
            let report = app.with_package(&alias, |ctx| SvnCommit::process(ctx, &alias, &message))?;
            match report.revision {
                Some(revision) => {
                    println!("Committed {} as revision {}", alias, revision);
                    if let Some(root) = &report.merkle_root {
                        println!("  Merkle root: {}", root);
                    }
                    println!("  Added: {}  Removed: {}", report.added, report.removed);
                }
                None => println!("Nothing to commit for {}", alias),
            }
            Ok(())
        }
        PackageCommands::Release {
            alias,
            version,
            breaking,
        } => {
            let version = app.with_package(&alias, |ctx| {
                SvnRelease::process(ctx, &alias, version.as_deref(), breaking)
            })?;
            println!("Released {} {}{}", alias, version, if breaking { " (breaking)" } else { "" });
            Ok(())
        }
        PackageCommands::Install {
            serials,
            repo,
            dev,
            version,
            noverify,
            license_id,
        } => {
            let repo = app.repository(repo.as_deref())?;
            let options = InstallOptions {
                version: match (dev, version) {
                    (true, _) => VersionConstraint::Dev,
                    (false, Some(v)) => VersionConstraint::Exact(v),
                    (false, None) => VersionConstraint::Latest,
                },
                noverify,
                license_id,
            };

            for serial in &serials {
                let (author, _) = parse_serial(serial)?;
                let report = app.with_context(&repo, author, |ctx| {
                    SvnInstall::process(ctx, &repo, serial, &options)
                })?;
                println!("Installed package: {} version {}", report.serial, report.version);
                println!("  Files: {}", report.files);
                if !report.dependencies.is_empty() {
                    println!("  Dependencies: {}", report.dependencies.join(", "));
                }
                if !report.migrations.is_empty() {
                    println!("  Migrations: {}", report.migrations.len());
                }
                match &report.signer {
                    Some(signer) => println!("  Signed by: {} ({})", signer.subject, signer.fingerprint),
                    None => println!("  Signature: NOT VERIFIED"),
                }
            }
            Ok(())
        }
        PackageCommands::Upgrade {
            aliases,
            confirm,
            noverify,
        } => {
            let aliases = if aliases.is_empty() {
                LocalPackage::list_all(&app.conn)?
                    .into_iter()
                    .filter(|p| !p.is_local)
                    .map(|p| p.alias)
                    .collect()
            } else {
                aliases
            };
            let options = UpgradeOptions { confirm, noverify };

            for alias in &aliases {
                let outcome = app.with_package(alias, |ctx| SvnUpgrade::process(ctx, alias, options))?;
                match outcome {
                    UpgradeOutcome::NoUpgrades { version } => {
                        println!("{} {} is up to date", alias, version);
                    }
                    UpgradeOutcome::Declined { breaking } => {
                        println!("Skipped {} (breaking: {})", alias, breaking.join(", "));
                        println!("Ok, goodbye");
                    }
                    UpgradeOutcome::Upgraded {
                        from,
                        to,
                        updated,
                        deleted,
                        transaction,
                        verified,
                    } => {
                        println!("Upgraded {} from {} to {}", alias, from, to);
                        println!("  Updated: {}  Deleted: {}", updated, deleted);
                        println!("  Rollback transaction: {}", transaction);
                        if !verified {
                            println!("  Signature: NOT VERIFIED");
                        }
                    }
                }
            }
            Ok(())
        }
        PackageCommands::Rollback {
            alias,
            version,
            since,
        } => run_rollback(app, alias, version, since),
        PackageCommands::List => {
            let packages = LocalPackage::list_all(&app.conn)?;
            if packages.is_empty() {
                println!("No packages installed.");
            } else {
                println!("Installed packages:");
                for package in &packages {
                    print!("  {} {} ({})", package.serial(), package.version(), package.repo_alias());
                    if package.is_local {
                        print!(" [local]");
                    }
                    println!();
                }
                println!("\nTotal: {} package(s)", packages.len());
            }
            Ok(())
        }
    }
}

fn run_rollback(
    app: &mut App,
    alias: Option<String>,
    version: Option<String>,
    since: Option<String>,
) -> Result<()> {
    let restorer = Restorer::new(&app.config, &app.conn, &app.hooks);
    let log = restorer.log()?;
    let newest = log.newest_first();
    if newest.is_empty() {
        println!("No upgrades to roll back.");
        return Ok(());
    }

    let (question, reports) = match (alias, version, since) {
        (Some(alias), Some(version), _) => {
            let question = format!("Roll back {} to before {}, and every later upgrade?", alias, version);
            if !app.operator.confirm(&question) {
                println!("Ok, goodbye");
                return Ok(());
            }
            (question, restorer.process(&alias, &version)?)
        }
        (Some(alias), None, _) => {
            return Err(anyhow!("Give the version {} was upgraded to", alias));
        }
        (None, _, Some(since)) => {
            let question = format!("Roll back every upgrade since {}?", since);
            if !app.operator.confirm(&question) {
                println!("Ok, goodbye");
                return Ok(());
            }
            (question, restorer.rollback_since(&since)?)
        }
        (None, _, None) => {
            println!("Newest upgrade ({}):", newest[0]);
            for tx in restorer.describe(&newest[0])? {
                println!(
                    "  {} {} -> {} ({} files)",
                    tx.alias,
                    tx.to_version,
                    tx.from_version,
                    tx.files.len()
                );
            }
            let question = "Roll back this upgrade?".to_string();
            if !app.operator.confirm(&question) {
                println!("Ok, goodbye");
                return Ok(());
            }
            (question, restorer.rollback_latest()?.into_iter().collect())
        }
    };

    info!("{} -> {} transaction(s)", question, reports.len());
    for report in &reports {
        for (alias, version) in &report.packages {
            println!("Rolled back {} to {} ({})", alias, version, report.transaction);
        }
        println!("  Files restored: {}", report.files);
    }
    Ok(())
}
