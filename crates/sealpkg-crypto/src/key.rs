//! RSA private-key loading and detached signature primitives.

use std::fs;
use std::path::PathBuf;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha512};

use crate::digest::DigestAlgorithm;
use crate::error::CryptoError;

/// A private-key input prior to normalization: an already-parsed key, raw PEM
/// bytes, or a filesystem path.
#[derive(Clone)]
pub enum KeySource {
    /// A key object, passed through unchanged.
    Parsed(RsaPrivateKey),
    /// PEM bytes to parse.
    Pem(Vec<u8>),
    /// A file to read and parse as PEM.
    Path(PathBuf),
}

impl KeySource {
    /// Normalize the source into an [`RsaPrivateKey`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the file cannot be read or the bytes do not
    /// parse as a PKCS#8 or PKCS#1 RSA private key.
    pub fn resolve(self) -> Result<RsaPrivateKey, CryptoError> {
        match self {
            Self::Parsed(key) => Ok(key),
            Self::Pem(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| CryptoError::Key(format!("key PEM is not UTF-8: {e}")))?;
                parse_private_key_pem(&text)
            }
            Self::Path(path) => parse_private_key_pem(&fs::read_to_string(path)?),
        }
    }
}

/// Parse a PEM-encoded RSA private key, accepting both PKCS#8
/// (`BEGIN PRIVATE KEY`) and PKCS#1 (`BEGIN RSA PRIVATE KEY`) framing.
///
/// # Errors
///
/// Returns [`CryptoError::Key`] if neither encoding parses.
pub fn parse_private_key_pem(pem_text: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem_text)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem_text))
        .map_err(|e| CryptoError::Key(format!("unparseable RSA private key: {e}")))
}

/// Produce a deterministic RSA PKCS#1 v1.5 signature over `data`.
///
/// # Errors
///
/// Returns [`CryptoError::Key`] if the signing operation fails.
pub fn sign_bytes(
    key: &RsaPrivateKey,
    algorithm: DigestAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let signature = match algorithm {
        DigestAlgorithm::Sha256 => SigningKey::<Sha256>::new(key.clone())
            .try_sign(data)
            .map_err(|e| CryptoError::Key(e.to_string()))?
            .to_vec(),
        DigestAlgorithm::Sha512 => SigningKey::<Sha512>::new(key.clone())
            .try_sign(data)
            .map_err(|e| CryptoError::Key(e.to_string()))?
            .to_vec(),
    };
    Ok(signature)
}

/// Verify an RSA PKCS#1 v1.5 signature over `data` against a DER-encoded
/// `SubjectPublicKeyInfo`.
///
/// Returns `Ok(false)` when the signature does not match; a malformed public
/// key is an error.
///
/// # Errors
///
/// Returns [`CryptoError::Key`] if the public key does not parse.
pub fn verify_bytes(
    spki_der: &[u8],
    algorithm: DigestAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let public = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::Key(format!("unparseable public key: {e}")))?;
    let Ok(signature) = Signature::try_from(signature) else {
        return Ok(false);
    };
    let ok = match algorithm {
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public)
            .verify(data, &signature)
            .is_ok(),
        DigestAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(public)
            .verify(data, &signature)
            .is_ok(),
    };
    Ok(ok)
}

/// DER-encoded `SubjectPublicKeyInfo` of the key's public half, for
/// comparison with a certificate's certified key.
///
/// # Errors
///
/// Returns [`CryptoError::Key`] if encoding fails.
pub fn public_key_der(key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    Ok(key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| CryptoError::Key(e.to_string()))?
        .as_bytes()
        .to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 2048).unwrap()
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = test_key();
        let spki = public_key_der(&key).unwrap();
        let sig = sign_bytes(&key, DigestAlgorithm::Sha256, b"test digest").unwrap();
        assert!(verify_bytes(&spki, DigestAlgorithm::Sha256, b"test digest", &sig).unwrap());
    }

    #[test]
    fn tampered_data_fails_verification() {
        let key = test_key();
        let spki = public_key_der(&key).unwrap();
        let sig = sign_bytes(&key, DigestAlgorithm::Sha256, b"test digest").unwrap();
        assert!(!verify_bytes(&spki, DigestAlgorithm::Sha256, b"other digest", &sig).unwrap());
    }

    #[test]
    fn signature_is_deterministic() {
        let key = test_key();
        let first = sign_bytes(&key, DigestAlgorithm::Sha512, b"data").unwrap();
        let second = sign_bytes(&key, DigestAlgorithm::Sha512, b"data").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn garbage_signature_is_rejected_not_an_error() {
        let key = test_key();
        let spki = public_key_der(&key).unwrap();
        assert!(!verify_bytes(&spki, DigestAlgorithm::Sha256, b"data", &[0u8; 16]).unwrap());
    }
}
