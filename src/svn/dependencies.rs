// src/svn/dependencies.rs

//! Staging the dependencies a package declares
//!
//! Already-installed dependencies are skipped, so installs are idempotent.
//! Recursion is bounded by a visited set (cycles) and
//! `Config::max_dependency_depth`. Nothing is written here; a failure at any
//! depth aborts the install before the project is touched.

use crate::db::models::{LocalPackage, Repository};
use crate::error::{Error, Result};
use crate::packages::manifest::Manifest;
use crate::svn::install::{InstallOptions, InstallPlan, SvnInstall};
use crate::svn::{Context, parse_serial};
use tracing::{debug, info, warn};

pub struct SvnDependencies;

impl SvnDependencies {
    /// Stage every missing dependency of `parent` into `plan`
    pub(crate) fn process(
        ctx: &mut Context<'_>,
        repository: &Repository,
        parent: &str,
        manifest: &Manifest,
        noverify: bool,
        plan: &mut InstallPlan,
        depth: usize,
    ) -> Result<()> {
        for (serial, constraint) in manifest.dependencies()? {
            let (_, alias) = parse_serial(&serial)?;
            if LocalPackage::exists(ctx.conn, alias)? {
                debug!("{} already installed, skipping", serial);
                continue;
            }
            if plan.is_staged(&serial) {
                debug!("{} already staged, skipping", serial);
                continue;
            }
            if plan.visited.contains(&serial) {
                warn!("Dependency cycle: {} requires {} which is being installed", parent, serial);
                continue;
            }
            if depth + 1 > ctx.config.max_dependency_depth {
                return Err(Error::Dependency(format!(
                    "Dependency chain through {} is deeper than {} levels",
                    parent, ctx.config.max_dependency_depth
                )));
            }

            let access = ctx
                .api
                .check(&serial)
                .map_err(|e| Error::Dependency(format!("Unable to check {} (required by {}): {}", serial, parent, e)))?;
            if !access.can_read {
                return Err(Error::Dependency(format!(
                    "No read access to {} (required by {})",
                    serial, parent
                )));
            }

            info!("Resolving dependency {} ({}) of {}", serial, constraint, parent);
            let options = InstallOptions {
                version: constraint,
                noverify,
                license_id: None,
            };
            SvnInstall::stage(ctx, repository, &serial, &options, plan, depth + 1).map_err(|e| match e {
                Error::Dependency(_) => e,
                other => Error::Dependency(format!(
                    "Unable to install {} (required by {}): {}",
                    serial, parent, other
                )),
            })?;
        }

        Ok(())
    }
}
