//! Error types for building, verifying, and extracting packages.

use thiserror::Error;

use sealpkg_core::spec::SpecError;
use sealpkg_crypto::error::{CryptoError, PolicyError};

/// Errors that can occur when building, verifying, or extracting a package.
#[derive(Debug, Error)]
pub enum PackError {
    /// The outer archive is malformed: a required member is missing, gzip or
    /// tar framing is invalid, or a checksum does not match.
    #[error("malformed package: {0}")]
    Format(String),
    /// An extraction target would escape the destination directory.
    #[error("installing into parent path '{0}' is not allowed")]
    UnsafePath(String),
    /// The file carries the legacy checksum marker and uses the old format.
    #[error("old-format package is not supported")]
    Legacy,
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A certificate or key operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    /// The attached security policy rejected the package.
    #[error("policy violation: {0}")]
    Policy(#[from] PolicyError),
    /// The package specification is invalid or unparseable.
    #[error("spec error: {0}")]
    Spec(#[from] SpecError),
}
