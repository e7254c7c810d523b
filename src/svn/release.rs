// src/svn/release.rs

//! Cutting a release tag from trunk

use crate::db::models::LocalPackage;
use crate::error::{Error, Result};
use crate::packages::manifest::Manifest;
use crate::svn::client::{SvnRepo, TRUNK, tag_dir};
use crate::svn::transport::Reply;
use crate::svn::verify::IS_BREAKING_PROP;
use crate::svn::Context;
use semver::Version;
use tracing::info;

pub struct SvnRelease;

impl SvnRelease {
    /// Tag trunk as `version` (or the working copy manifest's version)
    ///
    /// Tags are immutable: releasing an existing version fails.
    pub fn process(
        ctx: &mut Context<'_>,
        alias: &str,
        version: Option<&str>,
        breaking: bool,
    ) -> Result<String> {
        let mut package = LocalPackage::get(ctx.conn, alias)?;
        let serial = package.serial();

        let version = match version {
            Some(v) => v.trim_start_matches('v').to_string(),
            None => Manifest::load(&ctx.config.working_copy(alias))?
                .package
                .version
                .ok_or_else(|| {
                    Error::Parse(format!(
                        "No version given and none set in the manifest of {}",
                        serial
                    ))
                })?,
        };
        Version::parse(&version)
            .map_err(|e| Error::Parse(format!("Invalid release version {}: {}", version, e)))?;

        let mut svn = SvnRepo::for_package(ctx.backend.clone(), ctx.conn, &package, ctx.config)?;
        svn.use_ssh()?;

        let tag = tag_dir(&version);
        match svn.info(&tag) {
            Reply::Ok(_) => {
                return Err(Error::AlreadyExists(format!(
                    "{} {} is already released",
                    serial, version
                )));
            }
            Reply::NotFound(_) => {}
            Reply::Failed(_) => return Err(svn.failure(&format!("Unable to look up {}", tag))),
        }

        let message = format!("Release {} {}", serial, version);
        if !svn.copy(TRUNK, &tag, &message).is_ok() {
            return Err(svn.failure(&format!("Unable to tag {}", version)));
        }
        if breaking && !svn.propset_remote(IS_BREAKING_PROP, "1", &tag, &message).is_ok() {
            return Err(svn.failure(&format!("Tagged {} but could not flag it as breaking", version)));
        }

        package.set_version(&version);
        package.save(ctx.conn)?;

        info!("Released {} {}{}", serial, version, if breaking { " (breaking)" } else { "" });
        Ok(version)
    }
}
