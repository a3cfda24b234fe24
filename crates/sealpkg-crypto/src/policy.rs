//! Named verification policies over certificate chains and detached
//! signatures.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::debug;
use rsa::RsaPrivateKey;

use sealpkg_core::spec::PackageSpec;

use crate::cert::{CertChain, Certificate};
use crate::digest::{Digest, DigestAlgorithm};
use crate::error::PolicyError;
use crate::key::{public_key_der, verify_bytes};
use crate::paths;
use crate::store::TrustStore;

/// A named bundle of verification toggles.
///
/// The set of policies is closed: the five constructors below are the only
/// instances. Strictness grows monotonically from [`Policy::no_security`]
/// to [`Policy::high_security`].
#[derive(Debug, Clone)]
pub struct Policy {
    name: &'static str,
    only_signed: bool,
    only_trusted: bool,
    verify_chain: bool,
    verify_data: bool,
    verify_root: bool,
    verify_signer: bool,
    trust_dir: PathBuf,
    algorithm: DigestAlgorithm,
}

impl Policy {
    fn preset(
        name: &'static str,
        only_signed: bool,
        only_trusted: bool,
        verify_chain: bool,
        verify_data: bool,
        verify_root: bool,
        verify_signer: bool,
    ) -> Self {
        Self {
            name,
            only_signed,
            only_trusted,
            verify_chain,
            verify_data,
            verify_root,
            verify_signer,
            trust_dir: paths::default_trust_dir(),
            algorithm: DigestAlgorithm::default(),
        }
    }

    /// No checks at all; unsigned packages are accepted.
    #[must_use]
    pub fn no_security() -> Self {
        Self::preset("NoSecurity", false, false, false, false, false, false)
    }

    /// Verify data signatures only, when present.
    #[must_use]
    pub fn almost_no_security() -> Self {
        Self::preset("AlmostNoSecurity", false, false, false, true, false, false)
    }

    /// Verify data signatures and the signer certificate's validity window.
    #[must_use]
    pub fn low_security() -> Self {
        Self::preset("LowSecurity", false, false, false, true, false, true)
    }

    /// Verify data, signer, chain adjacency, and the self-signed root.
    #[must_use]
    pub fn medium_security() -> Self {
        Self::preset("MediumSecurity", false, false, true, true, true, true)
    }

    /// All checks on: packages must be signed and the root must be present
    /// in the trust store.
    #[must_use]
    pub fn high_security() -> Self {
        Self::preset("HighSecurity", true, true, true, true, true, true)
    }

    /// Replace the trust-store directory consulted by the trust check.
    #[must_use]
    pub fn with_trust_dir(mut self, trust_dir: PathBuf) -> Self {
        self.trust_dir = trust_dir;
        self
    }

    /// The policy's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this policy rejects unsigned packages outright.
    #[must_use]
    pub fn requires_signatures(&self) -> bool {
        self.only_signed
    }

    /// Evaluate the policy over a chain, an optional signing key, and the
    /// collected member digests and detached signatures.
    ///
    /// The current time is captured once at entry; every validity check uses
    /// that instant.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`] of the first failing check, in the fixed
    /// order: signature presence, key/chain match, signer validity, chain
    /// adjacency, root self-signature, root trust, data signatures.
    pub fn verify(
        &self,
        chain: &CertChain,
        key: Option<&RsaPrivateKey>,
        digests: &HashMap<String, Digest>,
        signatures: &HashMap<String, Vec<u8>>,
    ) -> Result<(), PolicyError> {
        let now = Utc::now();

        if self.only_signed && signatures.is_empty() {
            return Err(PolicyError::UnsignedRejected);
        }

        let signer = chain.leaf();
        if let (Some(signer), Some(key)) = (signer, key) {
            check_key(signer, key)?;
        }

        if self.verify_signer {
            let signer = signer.ok_or_else(|| {
                PolicyError::Chain("missing signing certificate".to_owned())
            })?;
            check_cert(signer, None, now)?;
        }

        if self.verify_chain {
            if chain.is_empty() {
                return Err(PolicyError::Chain("missing certificate chain".to_owned()));
            }
            let certs = chain.certs();
            for pair in certs.windows(2) {
                check_cert(&pair[1], Some(&pair[0]), now)?;
            }
        }

        if self.verify_root {
            check_root(chain, now)?;
        }

        if self.only_trusted {
            self.check_trust(chain)?;
        }

        if self.verify_data {
            for (name, digest) in digests {
                let Some(signature) = signatures.get(name) else {
                    return Err(PolicyError::MissingSignature { name: name.clone() });
                };
                let signer = signer.ok_or_else(|| {
                    PolicyError::Chain("missing signing certificate".to_owned())
                })?;
                let ok = verify_bytes(
                    signer.public_key_der(),
                    self.algorithm,
                    digest.bytes(),
                    signature,
                )
                .map_err(|e| PolicyError::Chain(e.to_string()))?;
                if !ok {
                    return Err(PolicyError::BadSignature { name: name.clone() });
                }
            }
        }

        Ok(())
    }

    /// Parse the chain embedded in a spec and evaluate the policy against it.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Chain`] if the embedded chain does not parse,
    /// or any error from [`Policy::verify`].
    pub fn verify_signatures(
        &self,
        spec: &PackageSpec,
        digests: &HashMap<String, Digest>,
        signatures: &HashMap<String, Vec<u8>>,
    ) -> Result<(), PolicyError> {
        let chain = CertChain::from_pem_list(&spec.cert_chain)
            .map_err(|e| PolicyError::Chain(e.to_string()))?;
        debug!(
            "verifying {} digests and {} signatures under {}",
            digests.len(),
            signatures.len(),
            self.name
        );
        self.verify(&chain, None, digests, signatures)
    }

    fn check_trust(&self, chain: &CertChain) -> Result<(), PolicyError> {
        let Some(root) = chain.root() else {
            return Err(PolicyError::UntrustedRoot {
                subject: "(empty chain)".to_owned(),
            });
        };
        let store = TrustStore::with_algorithm(self.trust_dir.clone(), self.algorithm);
        let stored = store
            .load_root(root)
            .map_err(|e| PolicyError::Store(e.to_string()))?
            .ok_or_else(|| PolicyError::UntrustedRoot {
                subject: root.subject().to_owned(),
            })?;
        let stored_digest = self.algorithm.digest(stored.public_key_der());
        let presented_digest = self.algorithm.digest(root.public_key_der());
        if stored_digest != presented_digest {
            return Err(PolicyError::TrustDigestMismatch {
                subject: root.subject().to_owned(),
            });
        }
        Ok(())
    }
}

/// Check a certificate's validity window at `time`, and optionally its
/// signature against `issuer`.
fn check_cert(
    signer: &Certificate,
    issuer: Option<&Certificate>,
    time: DateTime<Utc>,
) -> Result<(), PolicyError> {
    if signer.not_before() > time {
        return Err(PolicyError::NotYetValid {
            subject: signer.subject().to_owned(),
            not_before: signer.not_before(),
        });
    }
    if signer.not_after() < time {
        return Err(PolicyError::Expired {
            subject: signer.subject().to_owned(),
            not_after: signer.not_after(),
        });
    }
    if let Some(issuer) = issuer {
        let ok = signer
            .signed_by(issuer)
            .map_err(|e| PolicyError::Chain(e.to_string()))?;
        if !ok {
            return Err(PolicyError::IssuerMismatch {
                subject: signer.subject().to_owned(),
                issuer: issuer.subject().to_owned(),
            });
        }
    }
    Ok(())
}

/// The first chain element must be a currently valid, self-signed root.
fn check_root(chain: &CertChain, time: DateTime<Utc>) -> Result<(), PolicyError> {
    let Some(root) = chain.root() else {
        return Err(PolicyError::NonSelfSignedRoot {
            subject: "(empty chain)".to_owned(),
        });
    };
    if !root.is_self_signed() {
        return Err(PolicyError::NonSelfSignedRoot {
            subject: root.subject().to_owned(),
        });
    }
    check_cert(root, Some(root), time)
}

/// The leaf certificate must certify exactly the signing key.
fn check_key(signer: &Certificate, key: &RsaPrivateKey) -> Result<(), PolicyError> {
    let key_der = public_key_der(key).map_err(|e| PolicyError::Chain(e.to_string()))?;
    if key_der != signer.public_key_der() {
        return Err(PolicyError::KeyChainMismatch {
            subject: signer.subject().to_owned(),
        });
    }
    Ok(())
}
