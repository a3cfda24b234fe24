//! On-disk trust store of root certificates.
//!
//! The store is a directory of PEM certificates at content-addressed paths.
//! Lookup during chain closure is by subject distinguished name; whether a
//! presented root is actually trusted is decided by comparing a digest of
//! the stored and presented public keys, so a subject-name collision cannot
//! grant trust.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::cert::Certificate;
use crate::digest::DigestAlgorithm;
use crate::error::CryptoError;

/// A directory of trusted root certificates.
#[derive(Debug, Clone)]
pub struct TrustStore {
    dir: PathBuf,
    algorithm: DigestAlgorithm,
}

impl TrustStore {
    /// Open a trust store over `dir` using the default digest algorithm.
    ///
    /// The directory does not need to exist; a missing directory behaves as
    /// an empty store on the read path.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self::with_algorithm(dir, DigestAlgorithm::default())
    }

    /// Open a trust store with an explicit digest algorithm.
    #[must_use]
    pub fn with_algorithm(dir: PathBuf, algorithm: DigestAlgorithm) -> Self {
        Self { dir, algorithm }
    }

    /// The store's directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic path for a certificate, derived from a digest over its
    /// public key.
    #[must_use]
    pub fn cert_path(&self, cert: &Certificate) -> PathBuf {
        let digest = self.algorithm.digest(cert.public_key_der());
        self.dir.join(format!("cert-{}.pem", digest.hex()))
    }

    /// Load the stored certificate at [`Self::cert_path`] for `cert`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load_root(&self, cert: &Certificate) -> Result<Option<Certificate>, CryptoError> {
        let path = self.cert_path(cert);
        if !path.is_file() {
            return Ok(None);
        }
        Certificate::from_pem(&fs::read(path)?).map(Some)
    }

    /// Find the stored certificate whose subject equals `cert`'s issuer.
    ///
    /// Returns `Ok(None)` when no such certificate exists; an absent issuer
    /// leaves the chain open and is not an error. Unparseable store entries
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Io`] if the directory cannot be listed.
    pub fn issuer_of(&self, cert: &Certificate) -> Result<Option<Certificate>, CryptoError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            match Certificate::from_pem(&fs::read(&path)?) {
                Ok(candidate) if candidate.subject() == cert.issuer() => {
                    return Ok(Some(candidate));
                }
                Ok(_) => {}
                Err(e) => debug!("skipping unparseable trust entry {}: {e}", path.display()),
            }
        }
        Ok(None)
    }

    /// Add a certificate to the store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Io`] if the store cannot be written.
    pub fn add(&self, cert: &Certificate) -> Result<PathBuf, CryptoError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.cert_path(cert);
        fs::write(&path, cert.to_pem())?;
        Ok(path)
    }

    /// Remove a certificate from the store.
    ///
    /// Removing a certificate that is not present is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Io`] if the file exists but cannot be deleted.
    pub fn remove(&self, cert: &Certificate) -> Result<(), CryptoError> {
        let path = self.cert_path(cert);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
