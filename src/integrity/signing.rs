// src/integrity/signing.rs

//! Detached OpenPGP signatures over merkle roots

use crate::error::{Error, Result};
use sequoia_openpgp as openpgp;
use openpgp::Cert;
use openpgp::crypto::Password;
use openpgp::packet::key::{SecretParts, UnspecifiedRole};
use openpgp::packet::Key;
use openpgp::parse::Parse;
use openpgp::parse::stream::{
    DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationHelper,
};
use openpgp::policy::StandardPolicy;
use openpgp::serialize::stream::{Armorer, Message, Signer};
use std::io::Write;
use tracing::debug;

/// Identity of whoever produced a verified signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    pub subject: String,
    pub fingerprint: String,
}

impl SignerIdentity {
    pub fn from_cert(subject: &str, cert: &Cert) -> Self {
        Self {
            subject: subject.to_string(),
            fingerprint: cert.fingerprint().to_hex(),
        }
    }
}

/// An unlocked signing key
pub struct PackageSigner {
    key: Key<SecretParts, UnspecifiedRole>,
    fingerprint: String,
}

impl std::fmt::Debug for PackageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageSigner")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Whether the signing-capable secret key of `cert` needs a password
pub fn requires_password(cert: &Cert) -> bool {
    let policy = StandardPolicy::new();
    cert.keys()
        .secret()
        .with_policy(&policy, None)
        .for_signing()
        .any(|ka| ka.key().secret().is_encrypted())
}

impl PackageSigner {
    /// Unlock the signing subkey of `cert`, decrypting it with `password` if needed
    pub fn unlock(cert: &Cert, password: Option<&str>) -> Result<Self> {
        let policy = StandardPolicy::new();
        let ka = cert
            .keys()
            .secret()
            .with_policy(&policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .next()
            .ok_or_else(|| {
                Error::Signing(format!(
                    "Certificate {} has no usable signing key",
                    cert.fingerprint()
                ))
            })?;

        let mut key = ka.key().clone();
        if key.secret().is_encrypted() {
            let password = password.ok_or_else(|| {
                Error::Signing("Signing key is encrypted and no password was given".to_string())
            })?;
            key = key
                .decrypt_secret(&Password::from(password))
                .map_err(|_| Error::Signing("Unable to unlock signing key: wrong password".to_string()))?;
        }

        Ok(Self {
            key,
            fingerprint: cert.fingerprint().to_hex(),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Produce an ASCII-armored detached signature over `data`
    pub fn sign(&self, data: &[u8]) -> Result<String> {
        let keypair = self
            .key
            .clone()
            .into_keypair()
            .map_err(|e| Error::Signing(format!("Unable to use signing key: {}", e)))?;

        let mut sink = Vec::new();
        {
            let message = Message::new(&mut sink);
            let message = Armorer::new(message)
                .kind(openpgp::armor::Kind::Signature)
                .build()
                .map_err(|e| Error::Signing(e.to_string()))?;
            let mut signer = Signer::new(message, keypair)
                .detached()
                .build()
                .map_err(|e| Error::Signing(e.to_string()))?;
            signer.write_all(data)?;
            signer
                .finalize()
                .map_err(|e| Error::Signing(e.to_string()))?;
        }

        debug!("Signed {} bytes with {}", data.len(), self.fingerprint);
        String::from_utf8(sink).map_err(|e| Error::Signing(e.to_string()))
    }
}

struct Helper<'a> {
    cert: &'a Cert,
}

impl VerificationHelper for Helper<'_> {
    fn get_certs(&mut self, _ids: &[openpgp::KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(vec![self.cert.clone()])
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                if results.iter().any(|r| r.is_ok()) {
                    return Ok(());
                }
            }
        }
        Err(anyhow::anyhow!("No valid signature"))
    }
}

/// Check an armored detached signature over `data` against `cert`
///
/// Any malformed or non-matching signature yields `false`.
pub fn verify_signature(cert: &Cert, data: &[u8], signature: &str) -> bool {
    let policy = StandardPolicy::new();
    let verifier = DetachedVerifierBuilder::from_bytes(signature.as_bytes())
        .and_then(|builder| builder.with_policy(&policy, None, Helper { cert }));

    match verifier {
        Ok(mut verifier) => match verifier.verify_bytes(data) {
            Ok(()) => true,
            Err(e) => {
                debug!("Signature rejected: {}", e);
                false
            }
        },
        Err(e) => {
            debug!("Unable to parse signature: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpgp::cert::{CertBuilder, CipherSuite};

    fn cert(password: Option<&str>) -> Cert {
        let mut builder = CertBuilder::general_purpose(None::<CipherSuite>, Some("jsmith@example.com"));
        if let Some(pw) = password {
            builder = builder.set_password(Some(Password::from(pw)));
        }
        builder.generate().unwrap().0
    }

    #[test]
    fn test_sign_and_verify() {
        let cert = cert(None);
        let signer = PackageSigner::unlock(&cert, None).unwrap();
        let sig = signer.sign(b"root-a").unwrap();

        assert!(sig.contains("BEGIN PGP SIGNATURE"));
        assert!(verify_signature(&cert, b"root-a", &sig));
        assert!(!verify_signature(&cert, b"root-b", &sig));
    }

    #[test]
    fn test_wrong_certificate_rejected() {
        let alice = cert(None);
        let mallory = cert(None);
        let sig = PackageSigner::unlock(&mallory, None).unwrap().sign(b"root").unwrap();
        assert!(!verify_signature(&alice, b"root", &sig));
    }

    #[test]
    fn test_encrypted_key_requires_password() {
        let cert = cert(Some("hunter2"));
        assert!(requires_password(&cert));
        assert!(matches!(PackageSigner::unlock(&cert, None), Err(Error::Signing(_))));
        assert!(matches!(
            PackageSigner::unlock(&cert, Some("wrong")),
            Err(Error::Signing(_))
        ));
        assert!(PackageSigner::unlock(&cert, Some("hunter2")).is_ok());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let cert = cert(None);
        assert!(!verify_signature(&cert, b"root", "not a signature"));
    }
}
