// src/lib.rs

//! Apex package tooling
//!
//! Versioning, distribution and upgrade of Apex packages stored in
//! per-package Subversion repositories.
//!
//! # Architecture
//!
//! - Database-first: installed packages, repositories and external files live in SQLite
//! - Integrity: every commit carries a signed, chained merkle root over its inventory
//! - Upgrades: a state machine that verifies the target release before touching disk
//! - Rollback: every upgrade records a transaction that can be undone in reverse order

pub mod config;
pub mod db;
mod error;
pub mod hooks;
pub mod installer;
pub mod integrity;
pub mod operator;
pub mod packages;
pub mod repository;
pub mod rollback;
pub mod svn;

pub use config::Config;
pub use error::{Error, Result};
