//! Error types for certificate, key, and policy operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while handling certificates, keys, and trust roots.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// PEM framing could not be parsed, or the tag was unexpected.
    #[error("PEM error: {0}")]
    Pem(String),
    /// An X.509 structure could not be parsed or checked.
    #[error("X.509 error: {0}")]
    X509(String),
    /// An RSA key could not be parsed or used.
    #[error("key error: {0}")]
    Key(String),
    /// Certificate issuance failed.
    #[error("certificate generation error: {0}")]
    CertGen(String),
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A verification policy rejected the input.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Reasons a verification policy rejects a package.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy requires signatures and the package carries none.
    #[error("unsigned packages are not allowed by this policy")]
    UnsignedRejected,
    /// The leaf certificate does not belong to the signing key.
    #[error("certificate '{subject}' does not match the signing key")]
    KeyChainMismatch {
        /// Subject of the mismatched leaf certificate.
        subject: String,
    },
    /// A certificate's validity window has not started yet.
    #[error("certificate '{subject}' is not valid before {not_before}")]
    NotYetValid {
        /// Subject of the offending certificate.
        subject: String,
        /// Start of the validity window.
        not_before: DateTime<Utc>,
    },
    /// A certificate's validity window has ended.
    #[error("certificate '{subject}' expired at {not_after}")]
    Expired {
        /// Subject of the offending certificate.
        subject: String,
        /// End of the validity window.
        not_after: DateTime<Utc>,
    },
    /// A certificate is not signed by the adjacent issuer in the chain.
    #[error("certificate '{subject}' was not issued by '{issuer}'")]
    IssuerMismatch {
        /// Subject of the offending certificate.
        subject: String,
        /// Subject of the certificate presented as its issuer.
        issuer: String,
    },
    /// The first certificate of the chain is not self-signed.
    #[error("root certificate '{subject}' is not self-signed")]
    NonSelfSignedRoot {
        /// Subject of the presented root.
        subject: String,
    },
    /// The chain's root is not present in the trust store.
    #[error("root certificate '{subject}' is not trusted")]
    UntrustedRoot {
        /// Subject of the presented root.
        subject: String,
    },
    /// The stored root's public key digest differs from the presented root's.
    #[error("trusted certificate '{subject}' does not match the presented root")]
    TrustDigestMismatch {
        /// Subject of the presented root.
        subject: String,
    },
    /// A digested member has no corresponding detached signature.
    #[error("no signature for '{name}'")]
    MissingSignature {
        /// Archive member name.
        name: String,
    },
    /// A detached signature does not verify against the signer's public key.
    #[error("signature for '{name}' does not verify")]
    BadSignature {
        /// Archive member name.
        name: String,
    },
    /// The certificate chain is missing or could not be parsed.
    #[error("invalid certificate chain: {0}")]
    Chain(String),
    /// The trust store could not be read.
    #[error("trust store error: {0}")]
    Store(String),
}
