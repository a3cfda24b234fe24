//! Conventional filesystem locations for keys, certificates, and trust roots.
//!
//! Every component takes these locations as explicit constructor parameters;
//! the functions here are the default resolver, honoring the `SEALPKG_HOME`
//! environment override before falling back to `HOME`.

use std::env;
use std::path::PathBuf;

/// File name of the conventional private key, relative to the sealpkg home.
pub const PRIVATE_KEY_FILE: &str = "sealpkg-private_key.pem";

/// File name of the conventional public certificate, relative to the
/// sealpkg home.
pub const PUBLIC_CERT_FILE: &str = "sealpkg-public_cert.pem";

/// The directory conventional key material lives under: `$SEALPKG_HOME` if
/// set, otherwise `$HOME`, otherwise the current directory.
#[must_use]
pub fn sealpkg_home() -> PathBuf {
    let home = env::var("SEALPKG_HOME")
        .or_else(|_| env::var("HOME"))
        .unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home)
}

/// Conventional location of the signing key.
#[must_use]
pub fn default_key_path() -> PathBuf {
    sealpkg_home().join(PRIVATE_KEY_FILE)
}

/// Conventional location of the signer's certificate.
#[must_use]
pub fn default_cert_path() -> PathBuf {
    sealpkg_home().join(PUBLIC_CERT_FILE)
}

/// Conventional location of the trusted-root directory.
#[must_use]
pub fn default_trust_dir() -> PathBuf {
    sealpkg_home().join(".sealpkg").join("trusted")
}
