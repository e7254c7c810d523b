// src/packages/mod.rs

//! Package sources: the manifest, the project/repository path layout, and the
//! compiler that moves files between the project and a working copy.

pub mod compiler;
pub mod layout;
pub mod manifest;

pub use layout::PathConverter;
pub use manifest::{Manifest, VersionConstraint};
