//! Detached signing with certificate-chain management and expiry renewal.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use log::{debug, info};
use rsa::RsaPrivateKey;

use crate::cert::{CertChain, CertSource, Certificate};
use crate::digest::DigestAlgorithm;
use crate::error::{CryptoError, PolicyError};
use crate::issue::{issue_self_signed, CertSubject};
use crate::key::{parse_private_key_pem, public_key_der, sign_bytes, KeySource};
use crate::paths;
use crate::store::TrustStore;

/// Filesystem locations and renewal parameters for a [`Signer`].
#[derive(Debug, Clone)]
pub struct SignerOptions {
    /// Conventional location of the private key, probed when no key is given
    /// and compared against during renewal.
    pub key_path: PathBuf,
    /// Conventional location of the signer certificate, probed when no chain
    /// is given and rewritten during renewal.
    pub cert_path: PathBuf,
    /// Trust-store directory used to close open chains.
    pub trust_dir: PathBuf,
    /// Validity of a renewed self-signed certificate, in days.
    pub renew_validity_days: i64,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            key_path: paths::default_key_path(),
            cert_path: paths::default_cert_path(),
            trust_dir: paths::default_trust_dir(),
            renew_validity_days: 365,
        }
    }
}

/// Holds an RSA private key and its certificate chain, and produces detached
/// signatures over byte buffers.
///
/// A signer without a key is legal: [`Signer::sign`] then reports "no
/// signature" and the chain, if any, is carried for display purposes only.
pub struct Signer {
    chain: CertChain,
    key: Option<RsaPrivateKey>,
    algorithm: DigestAlgorithm,
    options: SignerOptions,
}

impl Signer {
    /// Construct a signer from optional key and chain sources.
    ///
    /// Resolution order:
    ///
    /// 1. No key given: probe `options.key_path`; absent means no key.
    /// 2. No chain given: probe `options.cert_path` for a single-element
    ///    chain; absent means an empty chain.
    /// 3. Normalize every chain element through [`CertSource::resolve`].
    /// 4. Close the chain by walking the trust store: while the first
    ///    certificate is not self-signed, prepend its stored issuer. A
    ///    missing issuer leaves the chain open for the policy to judge.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if a given source fails to load or parse, or
    /// the trust store cannot be read.
    pub fn new(
        key: Option<KeySource>,
        chain: Option<Vec<CertSource>>,
        options: SignerOptions,
    ) -> Result<Self, CryptoError> {
        let key = match key {
            Some(source) => Some(source.resolve()?),
            None if options.key_path.is_file() => {
                debug!("using signing key at {}", options.key_path.display());
                Some(KeySource::Path(options.key_path.clone()).resolve()?)
            }
            None => None,
        };
        Self::with_key(key, chain, options)
    }

    /// Construct a signer that never signs, regardless of any key present at
    /// the conventional location. The chain, if one resolves, is still
    /// carried so it can be attached to built packages for display.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if a given chain source fails to load.
    pub fn unsigned(
        chain: Option<Vec<CertSource>>,
        options: SignerOptions,
    ) -> Result<Self, CryptoError> {
        Self::with_key(None, chain, options)
    }

    fn with_key(
        key: Option<RsaPrivateKey>,
        chain: Option<Vec<CertSource>>,
        options: SignerOptions,
    ) -> Result<Self, CryptoError> {
        let sources = match chain {
            Some(sources) => sources,
            None if options.cert_path.is_file() => {
                vec![CertSource::Path(options.cert_path.clone())]
            }
            None => Vec::new(),
        };
        let certs = sources
            .into_iter()
            .map(CertSource::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        let mut chain = CertChain::new(certs);

        let store = TrustStore::new(options.trust_dir.clone());
        while let Some(root) = chain.root() {
            if root.is_self_signed() {
                break;
            }
            match store.issuer_of(root)? {
                Some(issuer) => {
                    debug!("closing chain with trusted issuer '{}'", issuer.subject());
                    chain.prepend(issuer);
                }
                None => break,
            }
        }

        Ok(Self {
            chain,
            key,
            algorithm: DigestAlgorithm::default(),
            options,
        })
    }

    /// The signer's certificate chain, root first.
    #[must_use]
    pub fn chain(&self) -> &CertChain {
        &self.chain
    }

    /// The digest algorithm signatures are made with.
    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Whether this signer holds a key and will produce signatures.
    #[must_use]
    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }

    /// Produce a detached signature over `data`, or `None` when the signer
    /// holds no key.
    ///
    /// When the chain is a single expired self-signed certificate, renewal is
    /// attempted first; when its preconditions do not hold, signing proceeds
    /// with the expired certificate and verification surfaces the expiry.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::KeyChainMismatch`] if the leaf certificate does
    /// not certify the signing key, or [`CryptoError`] if signing fails.
    pub fn sign(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, CryptoError> {
        if self.key.is_none() {
            return Ok(None);
        }
        if self.chain.len() == 1
            && self
                .chain
                .leaf()
                .is_some_and(|leaf| leaf.not_after() < Utc::now())
        {
            self.renew_expired_cert()?;
        }

        let Some(key) = self.key.as_ref() else {
            return Ok(None);
        };
        let Some(leaf) = self.chain.leaf() else {
            return Err(PolicyError::KeyChainMismatch {
                subject: "(empty chain)".to_owned(),
            }
            .into());
        };
        if public_key_der(key)? != leaf.public_key_der() {
            return Err(PolicyError::KeyChainMismatch {
                subject: leaf.subject().to_owned(),
            }
            .into());
        }
        sign_bytes(key, self.algorithm, data).map(Some)
    }

    /// Renewal: archive the expired self-signed certificate and replace it
    /// with a freshly issued successor over the same key and subject.
    ///
    /// Preconditions, all required; when any fails the expired chain is left
    /// untouched:
    ///
    /// 1. the key file at `options.key_path` parses to the in-memory key;
    /// 2. the certificate file at `options.cert_path` holds the expired
    ///    certificate;
    /// 3. no archival file `<cert_path>.expired.<YYYYMMDDHHMMSS>` exists for
    ///    the expired certificate's `not_after`.
    ///
    /// Together these make renewal idempotent and keep it from overwriting a
    /// certificate the user placed there deliberately.
    fn renew_expired_cert(&mut self) -> Result<(), CryptoError> {
        let (Some(key), Some(leaf)) = (self.key.as_ref(), self.chain.leaf()) else {
            return Ok(());
        };
        let leaf = leaf.clone();

        let disk_key_matches = fs::read_to_string(&self.options.key_path)
            .ok()
            .and_then(|pem_text| parse_private_key_pem(&pem_text).ok())
            .is_some_and(|disk_key| disk_key == *key);
        if !disk_key_matches {
            debug!("not renewing: key on disk does not match the in-memory key");
            return Ok(());
        }

        let disk_cert_matches = fs::read(&self.options.cert_path)
            .ok()
            .and_then(|bytes| Certificate::from_pem(&bytes).ok())
            .is_some_and(|disk_cert| disk_cert.der() == leaf.der());
        if !disk_cert_matches {
            debug!("not renewing: certificate on disk does not match the expired one");
            return Ok(());
        }

        let archive_path = PathBuf::from(format!(
            "{}.expired.{}",
            self.options.cert_path.display(),
            leaf.not_after().format("%Y%m%d%H%M%S")
        ));
        if archive_path.exists() {
            debug!(
                "not renewing: archival file {} already exists",
                archive_path.display()
            );
            return Ok(());
        }

        info!(
            "archiving expired certificate '{}' to {}",
            leaf.subject(),
            archive_path.display()
        );
        fs::rename(&self.options.cert_path, &archive_path)?;

        let subject = CertSubject::from_certificate(&leaf)?;
        let renewed = issue_self_signed(key, &subject, self.options.renew_validity_days)?;
        fs::write(&self.options.cert_path, renewed.to_pem())?;
        info!("issued renewed certificate '{}'", renewed.subject());
        self.chain = CertChain::new(vec![renewed]);
        Ok(())
    }
}
