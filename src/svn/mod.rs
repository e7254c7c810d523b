// src/svn/mod.rs

//! Version-control core
//!
//! `transport` defines the backend interface with a shell (`svn` binary) and an
//! in-memory implementation. `client` binds a backend to one package. The
//! remaining modules are the package operations built on top: checkout,
//! commit, release, export, install (with dependencies), changelog and
//! upgrade.

pub mod changelog;
pub mod checkout;
pub mod client;
pub mod commit;
pub mod dependencies;
pub mod export;
pub mod install;
pub mod inventory;
pub mod lock;
pub mod memory;
pub mod release;
pub mod shell;
pub mod ssh_agent;
pub mod transport;
pub mod upgrade;
pub mod verify;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hooks::HookRegistry;
use crate::operator::Operator;
use crate::repository::RepoApi;
use rusqlite::Connection;
use std::sync::Arc;
use transport::VcsBackend;

pub use changelog::{Changelog, SvnChangelog};
pub use checkout::{CheckoutOutcome, SvnCheckout};
pub use client::SvnRepo;
pub use commit::{CommitReport, SvnCommit};
pub use export::{Export, SvnExport};
pub use install::{InstallOptions, InstallReport, SvnInstall};
pub use release::SvnRelease;
pub use upgrade::{SvnUpgrade, UpgradeOptions, UpgradeOutcome, UpgradeState};

/// Everything a package operation needs, passed explicitly down the call chain
pub struct Context<'a> {
    pub config: &'a Config,
    pub conn: &'a Connection,
    pub backend: Arc<dyn VcsBackend>,
    pub api: &'a dyn RepoApi,
    pub operator: &'a mut dyn Operator,
    pub hooks: &'a HookRegistry,
}

/// Split `author/alias`
pub fn parse_serial(serial: &str) -> Result<(&str, &str)> {
    match serial.split_once('/') {
        Some((author, alias))
            if !author.is_empty() && !alias.is_empty() && !alias.contains('/') =>
        {
            Ok((author, alias))
        }
        _ => Err(Error::Parse(format!(
            "Invalid package '{}', expected author/alias",
            serial
        ))),
    }
}
