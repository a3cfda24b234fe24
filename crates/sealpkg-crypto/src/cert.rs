//! X.509 certificates and ordered certificate chains.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use x509_parser::parse_x509_certificate;

use crate::error::CryptoError;

/// An X.509 certificate, owning its DER encoding with the fields the
/// verification engine needs extracted at parse time.
///
/// Subject and issuer are kept as canonical distinguished-name strings;
/// chain walking compares certificates by these strings.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    spki_der: Vec<u8>,
}

impl Certificate {
    /// Parse a certificate from DER bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::X509`] if the bytes are not a valid certificate.
    pub fn from_der(der: Vec<u8>) -> Result<Self, CryptoError> {
        let (_, cert) =
            parse_x509_certificate(&der).map_err(|e| CryptoError::X509(e.to_string()))?;

        let subject = cert.subject().to_string();
        let issuer = cert.issuer().to_string();
        let not_before = asn1_to_utc(cert.validity().not_before)?;
        let not_after = asn1_to_utc(cert.validity().not_after)?;
        let spki_der = cert.public_key().raw.to_vec();

        Ok(Self {
            der,
            subject,
            issuer,
            not_before,
            not_after,
            spki_der,
        })
    }

    /// Parse a certificate from a PEM document with a `CERTIFICATE` tag.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Pem`] if the PEM framing is invalid or carries
    /// an unexpected tag, or [`CryptoError::X509`] if the payload does not
    /// parse as a certificate.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, CryptoError> {
        let parsed = pem::parse(pem_bytes).map_err(|e| CryptoError::Pem(e.to_string()))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(CryptoError::Pem(format!(
                "expected CERTIFICATE, found {}",
                parsed.tag()
            )));
        }
        Self::from_der(parsed.into_contents())
    }

    /// Serialize the certificate to PEM.
    #[must_use]
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// The DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Canonical subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Canonical issuer distinguished name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Start of the validity window.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// DER-encoded `SubjectPublicKeyInfo` of the certified key.
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Whether subject and issuer name the same entity.
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// Check this certificate's signature against the issuer's public key.
    ///
    /// Returns `Ok(false)` when the signature does not verify; parse failures
    /// are errors.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::X509`] if either certificate fails to re-parse.
    pub fn signed_by(&self, issuer: &Certificate) -> Result<bool, CryptoError> {
        let (_, cert) =
            parse_x509_certificate(&self.der).map_err(|e| CryptoError::X509(e.to_string()))?;
        let (_, issuer_cert) =
            parse_x509_certificate(&issuer.der).map_err(|e| CryptoError::X509(e.to_string()))?;
        Ok(cert.verify_signature(Some(issuer_cert.public_key())).is_ok())
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> Result<DateTime<Utc>, CryptoError> {
    Utc.timestamp_opt(t.timestamp(), 0)
        .single()
        .ok_or_else(|| CryptoError::X509(format!("unrepresentable validity time {t}")))
}

/// A certificate input prior to normalization: an already-parsed certificate,
/// raw PEM bytes, or a filesystem path.
#[derive(Debug, Clone)]
pub enum CertSource {
    /// A certificate object, passed through unchanged.
    Parsed(Certificate),
    /// PEM bytes to parse.
    Pem(Vec<u8>),
    /// A file to read and parse as PEM.
    Path(PathBuf),
}

impl CertSource {
    /// Classify a string: an existing file becomes [`CertSource::Path`],
    /// anything else is treated as PEM bytes.
    #[must_use]
    pub fn detect(value: &str) -> Self {
        let path = PathBuf::from(value);
        if path.is_file() {
            Self::Path(path)
        } else {
            Self::Pem(value.as_bytes().to_vec())
        }
    }

    /// Normalize the source into a parsed [`Certificate`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the file cannot be read or the bytes do not
    /// parse.
    pub fn resolve(self) -> Result<Certificate, CryptoError> {
        match self {
            Self::Parsed(cert) => Ok(cert),
            Self::Pem(bytes) => Certificate::from_pem(&bytes),
            Self::Path(path) => Certificate::from_pem(&fs::read(path)?),
        }
    }
}

/// An ordered certificate chain, root first, leaf (signer) last.
///
/// A chain is *closed* when its first element is self-signed; an open chain
/// is legal input and it is the verification policy's decision whether to
/// reject it.
#[derive(Debug, Clone, Default)]
pub struct CertChain {
    certs: Vec<Certificate>,
}

impl CertChain {
    /// Build a chain from certificates already in root-first order.
    #[must_use]
    pub fn new(certs: Vec<Certificate>) -> Self {
        Self { certs }
    }

    /// Parse a chain from PEM blobs in root-first order.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if any blob fails to parse.
    pub fn from_pem_list(pems: &[String]) -> Result<Self, CryptoError> {
        let certs = pems
            .iter()
            .map(|p| Certificate::from_pem(p.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(certs))
    }

    /// Serialize every certificate to PEM, preserving order.
    #[must_use]
    pub fn to_pem_list(&self) -> Vec<String> {
        self.certs.iter().map(Certificate::to_pem).collect()
    }

    /// Number of certificates in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether the chain holds no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// The certificates, root first.
    #[must_use]
    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    /// The first certificate: the (candidate) root.
    #[must_use]
    pub fn root(&self) -> Option<&Certificate> {
        self.certs.first()
    }

    /// The last certificate: the signer.
    #[must_use]
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certs.last()
    }

    /// Insert a certificate at the root position.
    pub fn prepend(&mut self, cert: Certificate) {
        self.certs.insert(0, cert);
    }

    /// Whether the chain starts with a self-signed root.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.root().is_some_and(Certificate::is_self_signed)
    }
}
