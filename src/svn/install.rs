// src/svn/install.rs

//! Installing a package from its repository
//!
//! Installs run in two phases. Staging touches nothing in the project:
//!
//! 1. access check
//! 2. export
//! 3. signature verification (skippable with `--noverify`)
//! 4. the same for every missing dependency, recursively
//!
//! Only once the whole set is staged does applying start, dependencies first:
//!
//! 5. materialize files into the project
//! 6. package records, migrations (not on slave instances), registry entries
//! 7. Composer requirements, class index, install hook
//!
//! Steps 6 and 7 share one database transaction. If anything in 5-7 fails,
//! the transaction rolls back, every file written is removed and
//! `composer.json` is restored, so no package of the set stays installed.

use crate::db;
use crate::db::models::{LocalPackage, PackageFileEntry, PackageType, Repository};
use crate::error::{Error, Result};
use crate::hooks;
use crate::installer::{self, COMPOSER_FILE};
use crate::integrity::signing::SignerIdentity;
use crate::packages::compiler::{self, Materialized};
use crate::packages::layout::PathConverter;
use crate::packages::manifest::{Manifest, VersionConstraint};
use crate::svn::client::SvnRepo;
use crate::svn::dependencies::SvnDependencies;
use crate::svn::export::{Export, SvnExport};
use crate::svn::verify;
use crate::svn::{Context, parse_serial};
use std::collections::BTreeSet;
use std::fs;
use std::ops::Range;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub version: VersionConstraint,
    /// Skip signature verification
    pub noverify: bool,
    pub license_id: Option<String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            version: VersionConstraint::Latest,
            noverify: false,
            license_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub serial: String,
    pub version: String,
    pub files: usize,
    /// Serials installed as dependencies, depth first
    pub dependencies: Vec<String>,
    pub migrations: Vec<String>,
    /// None when verification was skipped
    pub signer: Option<SignerIdentity>,
}

/// A package exported and verified, not yet written into the project
#[derive(Debug)]
pub(crate) struct Staged {
    serial: String,
    author: String,
    alias: String,
    repository: String,
    export: Export,
    manifest: Manifest,
    signer: Option<SignerIdentity>,
}

/// Packages staged so far, dependencies before their dependents
#[derive(Debug, Default)]
pub(crate) struct InstallPlan {
    /// Serials whose staging has started
    pub visited: BTreeSet<String>,
    pub staged: Vec<Staged>,
}

impl InstallPlan {
    pub fn is_staged(&self, serial: &str) -> bool {
        self.staged.iter().any(|s| s.serial == serial)
    }
}

/// What applying produced for one staged package
struct Applied {
    files: usize,
    migrations: Vec<String>,
}

pub struct SvnInstall;

impl SvnInstall {
    /// Install `serial` (`author/alias`) from `repository`, with its dependencies
    pub fn process(
        ctx: &mut Context<'_>,
        repository: &Repository,
        serial: &str,
        options: &InstallOptions,
    ) -> Result<InstallReport> {
        let mut plan = InstallPlan::default();
        Self::stage(ctx, repository, serial, options, &mut plan, 0)?;
        debug!("Staged {} packages for {}", plan.staged.len(), serial);

        let applied = Self::apply(ctx, &plan.staged)?;

        let (Some(package), Some(outcome)) = (plan.staged.pop(), applied.into_iter().last()) else {
            return Err(Error::NotFound(format!("Nothing staged for {}", serial)));
        };
        let dependencies = plan.staged.into_iter().map(|s| s.serial).collect();

        info!("Installed {} {} ({} files)", serial, package.export.version, outcome.files);
        Ok(InstallReport {
            serial: package.serial,
            version: package.export.version,
            files: outcome.files,
            dependencies,
            migrations: outcome.migrations,
            signer: package.signer,
        })
    }

    /// Export and verify `serial` and its missing dependencies into `plan`
    pub(crate) fn stage(
        ctx: &mut Context<'_>,
        repository: &Repository,
        serial: &str,
        options: &InstallOptions,
        plan: &mut InstallPlan,
        depth: usize,
    ) -> Result<()> {
        let (author, alias) = parse_serial(serial)?;
        if LocalPackage::exists(ctx.conn, alias)? {
            return Err(Error::AlreadyExists(format!("{} is already installed", alias)));
        }
        plan.visited.insert(serial.to_string());

        let access = ctx.api.check(serial)?;
        if !access.can_read {
            return Err(Error::PermissionDenied(format!(
                "No read access to {} on {}",
                serial, repository.alias
            )));
        }
        if let (Some(license), None) = (&access.license, &options.license_id) {
            return Err(Error::PermissionDenied(format!(
                "{} requires a {} license; pass --license-id",
                serial, license
            )));
        }

        info!("Staging {} ({}) from {}", serial, options.version, repository.alias);
        let mut svn = SvnRepo::new(ctx.backend.clone(), repository.clone(), author, alias, ctx.config);
        let export = SvnExport::process(&mut svn, ctx.api, &options.version, options.license_id.as_deref())?;

        let signer = if options.noverify {
            let message = format!(
                "WARNING: skipping signature verification of {} {} (--noverify)",
                serial, export.version
            );
            warn!("{}", message);
            ctx.operator.notice(&message);
            None
        } else {
            match verify::verify(&mut svn, ctx.api, ctx.config, &export.source, export.path(), None)? {
                Some(signer) => Some(signer),
                None => {
                    return Err(Error::IntegrityFailure(format!(
                        "Signature verification failed for {} {}; nothing was installed",
                        serial, export.version
                    )));
                }
            }
        };

        let manifest = export.manifest()?;
        SvnDependencies::process(ctx, repository, serial, &manifest, options.noverify, plan, depth)?;

        plan.staged.push(Staged {
            serial: serial.to_string(),
            author: author.to_string(),
            alias: alias.to_string(),
            repository: repository.alias.clone(),
            export,
            manifest,
            signer,
        });
        Ok(())
    }

    /// Write every staged package into the project, all or nothing
    fn apply(ctx: &Context<'_>, staged: &[Staged]) -> Result<Vec<Applied>> {
        let root = &ctx.config.root;
        let composer_path = root.join(COMPOSER_FILE);
        let composer_before = if composer_path.is_file() {
            Some(fs::read(&composer_path)?)
        } else {
            None
        };

        let mut written = Vec::new();
        let result = Self::write_all(ctx, staged, &mut written);
        if let Err(e) = &result {
            warn!("Install failed, removing {} written files: {}", written.len(), e);
            for file in &written {
                if let Err(err) = compiler::remove_file(root, &file.local_path) {
                    warn!("Unable to remove {}: {}", file.local_path, err);
                }
            }
            let restored = match &composer_before {
                Some(content) => fs::write(&composer_path, content),
                None if composer_path.exists() => fs::remove_file(&composer_path),
                None => Ok(()),
            };
            if let Err(err) = restored {
                warn!("Unable to restore {}: {}", composer_path.display(), err);
            }
            if let Err(err) = installer::rescan_class_index(ctx.config) {
                warn!("Unable to rebuild the class index: {}", err);
            }
        }
        result
    }

    fn write_all(ctx: &Context<'_>, staged: &[Staged], written: &mut Vec<Materialized>) -> Result<Vec<Applied>> {
        let (config, registry) = (ctx.config, ctx.hooks);

        let mut ranges: Vec<Range<usize>> = Vec::with_capacity(staged.len());
        for package in staged {
            let start = written.len();
            let converter = PathConverter::new(&package.alias);
            compiler::materialize_into(package.export.path(), &config.root, &converter, written)?;
            ranges.push(start..written.len());
        }

        db::transaction(ctx.conn, |tx| {
            let mut applied = Vec::with_capacity(staged.len());
            for (package, range) in staged.iter().zip(ranges) {
                let alias = package.alias.as_str();
                let mut record = LocalPackage::new(
                    alias.to_string(),
                    package.author.clone(),
                    package.repository.clone(),
                    package.export.version.clone(),
                );
                if let Some(kind) = &package.manifest.package.package_type {
                    record.package_type = kind.parse::<PackageType>().map_err(Error::Parse)?;
                }
                record.save(tx)?;
                for file in written[range.clone()].iter().filter(|f| f.is_external()) {
                    PackageFileEntry::new(alias.to_string(), file.local_path.clone()).insert(tx)?;
                }

                let migrations = if config.is_slave() {
                    debug!("Slave instance, skipping migrations of {}", alias);
                    Vec::new()
                } else {
                    hooks::run_migrations(tx, registry, alias, &config.root)?
                };

                installer::merge_composer(config, &package.manifest)?;
                installer::install_registry(tx, alias, &package.manifest)?;
                applied.push(Applied {
                    files: range.len(),
                    migrations,
                });
            }

            installer::rescan_class_index(config)?;
            for package in staged {
                registry.after_install(&package.alias, &config.root)?;
            }
            Ok(applied)
        })
    }
}
