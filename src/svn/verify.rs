// src/svn/verify.rs

//! Signing committed trees and verifying downloaded ones
//!
//! A commit stores the package's merkle root, its predecessor, the file
//! inventory and a detached OpenPGP signature over the root as properties on
//! the committed directory. Verification recomputes the root from what was
//! downloaded and checks it against those properties before anything touches
//! the project.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::integrity::certs::{CertName, CertStore, Lookup};
use crate::integrity::inventory::{Inventory, InventoryBuilder};
use crate::integrity::merkle::{MerkleTree, MerkleTreeBuilder};
use crate::integrity::signing::{PackageSigner, SignerIdentity, requires_password, verify_signature};
use crate::operator::Operator;
use crate::repository::RepoApi;
use crate::svn::client::SvnRepo;
use crate::svn::inventory::INVENTORY_PROP;
use crate::svn::transport::Reply;
use sequoia_openpgp::Cert;
use sequoia_openpgp::parse::Parse;
use std::path::Path;
use tracing::{debug, info, warn};

pub const MERKLE_ROOT_PROP: &str = "merkle_root";
pub const PREV_MERKLE_ROOT_PROP: &str = "prev_merkle_root";
pub const SIGNATURE_PROP: &str = "signature";
pub const SIGNED_BY_PROP: &str = "signed_by";
pub const IS_BREAKING_PROP: &str = "is_breaking";

/// Whether a property value means "set"
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn set_prop(svn: &mut SvnRepo, name: &str, value: &str) -> Result<()> {
    match svn.propset(name, value) {
        Reply::Ok(()) => Ok(()),
        _ => Err(svn.failure(&format!("Unable to set {}", name))),
    }
}

/// Sign `inventory` chained onto `prev` and stage the integrity properties
/// on the working copy root; the next commit publishes them
pub fn sign_package(
    svn: &mut SvnRepo,
    config: &Config,
    operator: &mut dyn Operator,
    inventory: &Inventory,
    prev: Option<&str>,
) -> Result<MerkleTree> {
    let serial = svn.serial();
    let tree = MerkleTreeBuilder::build(&serial, inventory, prev);

    let store = CertStore::new(config.certs_dir());
    let name = CertName::for_publisher(svn.author(), &svn.repository().alias);
    let cert = match store.secret(&name)? {
        Lookup::Found(cert) => cert,
        Lookup::NotFound => {
            return Err(Error::Signing(format!(
                "No signing key for {} (expected {}/{}.key)",
                serial,
                store.dir().display(),
                name.file_stem()
            )));
        }
    };

    let password = if requires_password(&cert) {
        let password = config
            .signing_password
            .clone()
            .or_else(|| operator.password(&format!("Password for signing key {}", name.file_stem())));
        match password {
            Some(password) => Some(password),
            None => {
                return Err(Error::Signing(format!(
                    "Signing key {} is password protected and no password was given",
                    name.file_stem()
                )));
            }
        }
    } else {
        None
    };

    let signer = PackageSigner::unlock(&cert, password.as_deref())?;
    let signature = signer.sign(tree.merkle_root.as_bytes())?;

    set_prop(svn, MERKLE_ROOT_PROP, &tree.merkle_root)?;
    if let Some(prev) = prev {
        set_prop(svn, PREV_MERKLE_ROOT_PROP, prev)?;
    }
    set_prop(svn, INVENTORY_PROP, &inventory.to_json()?)?;
    set_prop(svn, SIGNATURE_PROP, &signature)?;
    let author = svn.author().to_string();
    set_prop(svn, SIGNED_BY_PROP, &author)?;

    info!(
        "Signed {} ({} files) with {}",
        serial,
        inventory.len(),
        signer.fingerprint()
    );
    Ok(tree)
}

/// Public certificate of `subject`, from the local store or the repository API
fn load_certificate(
    api: &dyn RepoApi,
    config: &Config,
    subject: &str,
    repo_alias: &str,
) -> Result<Option<Cert>> {
    let store = CertStore::new(config.certs_dir());
    let name = CertName::for_publisher(subject, repo_alias);
    if let Lookup::Found(cert) = store.public(&name)? {
        return Ok(Some(cert));
    }

    match api.fetch_certificate(subject)? {
        Lookup::Found(armored) => {
            let cert = Cert::from_bytes(armored.as_bytes()).map_err(|e| {
                Error::Signing(format!("Invalid certificate published for {}: {}", subject, e))
            })?;
            store.save_public(&name, &cert)?;
            debug!("Cached certificate of {}", subject);
            Ok(Some(cert))
        }
        Lookup::NotFound => Ok(None),
    }
}

/// Check the tree downloaded to `local_dir` against the signature on `dir`
///
/// `tree` overrides the recomputation when the caller assembled the tree
/// itself (upgrades only download changed files). Returns the signer on
/// success and None on any mismatch or missing piece; callers must not
/// install anything in that case.
pub fn verify(
    svn: &mut SvnRepo,
    api: &dyn RepoApi,
    config: &Config,
    dir: &str,
    local_dir: &Path,
    tree: Option<MerkleTree>,
) -> Result<Option<SignerIdentity>> {
    let serial = svn.serial();

    let Some(remote_root) = svn.prop(MERKLE_ROOT_PROP, dir)? else {
        warn!("{} {} carries no merkle root", serial, dir);
        return Ok(None);
    };

    let tree = match tree {
        Some(tree) => tree,
        None => {
            let prev = svn.prop(PREV_MERKLE_ROOT_PROP, dir)?;
            let inventory = InventoryBuilder::from_tree(local_dir)?;
            MerkleTreeBuilder::build(&serial, &inventory, prev.as_deref())
        }
    };

    if tree.merkle_root != remote_root {
        warn!(
            "Merkle root mismatch for {} {}: computed {}, published {}",
            serial, dir, tree.merkle_root, remote_root
        );
        return Ok(None);
    }

    let (Some(signature), Some(signed_by)) = (
        svn.prop(SIGNATURE_PROP, dir)?,
        svn.prop(SIGNED_BY_PROP, dir)?,
    ) else {
        warn!("{} {} is not signed", serial, dir);
        return Ok(None);
    };

    // Only the package's author may vouch for it
    if signed_by != svn.author() {
        warn!(
            "{} {} is signed by {}, not by its author {}",
            serial,
            dir,
            signed_by,
            svn.author()
        );
        return Ok(None);
    }

    let repo_alias = svn.repository().alias.clone();
    let Some(cert) = load_certificate(api, config, &signed_by, &repo_alias)? else {
        warn!("No certificate available for signer {}", signed_by);
        return Ok(None);
    };

    if !verify_signature(&cert, remote_root.as_bytes(), &signature) {
        warn!("Signature on {} {} does not match {}", serial, dir, signed_by);
        return Ok(None);
    }

    let identity = SignerIdentity::from_cert(&signed_by, &cert);
    info!(
        "Verified {} {} signed by {} ({})",
        serial, dir, identity.subject, identity.fingerprint
    );
    Ok(Some(identity))
}
