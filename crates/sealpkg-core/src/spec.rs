//! Package specification: the record serialized into `metadata.gz`.

use std::path::{Component, Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NameError, PackageName};

/// Errors returned when validating or (de)serializing a [`PackageSpec`].
#[derive(Debug, Error)]
pub enum SpecError {
    /// A listed file is an absolute path.
    #[error("file '{0}' must be a relative path")]
    AbsoluteFile(String),
    /// A listed file contains a parent-directory component.
    #[error("file '{0}' must not contain '..'")]
    TraversalFile(String),
    /// The summary field is empty.
    #[error("summary must not be empty")]
    EmptySummary,
    /// The package name failed validation.
    #[error(transparent)]
    Name(#[from] NameError),
    /// YAML (de)serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The descriptive record of a package: name, version, file list, and the
/// certificate chain of its signer.
///
/// The `signing_key` field is build-time state only and is never written to
/// the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Package name slug.
    pub name: PackageName,
    /// Package version (semver).
    pub version: Version,
    /// Human-readable one-line summary.
    pub summary: String,
    /// Relative paths of the payload files, in archive order.
    pub files: Vec<String>,
    /// PEM-encoded certificate chain of the signer, root first.
    /// Empty for unsigned packages.
    #[serde(default)]
    pub cert_chain: Vec<String>,
    /// Path to the RSA private key used to sign the package at build time.
    /// Never serialized.
    #[serde(skip)]
    pub signing_key: Option<PathBuf>,
}

impl PackageSpec {
    /// Create a spec with the given name, version, and summary.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Name`] if the name is not valid.
    pub fn new(name: &str, version: Version, summary: &str) -> Result<Self, SpecError> {
        Ok(Self {
            name: PackageName::new(name)?,
            version,
            summary: summary.to_owned(),
            files: Vec::new(),
            cert_chain: Vec::new(),
            signing_key: None,
        })
    }

    /// Check that the spec describes a buildable package.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] if the summary is empty, or if any listed file
    /// is absolute or contains a `..` component.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.summary.trim().is_empty() {
            return Err(SpecError::EmptySummary);
        }
        for file in &self.files {
            let path = Path::new(file);
            if path.is_absolute() {
                return Err(SpecError::AbsoluteFile(file.clone()));
            }
            if path.components().any(|c| c == Component::ParentDir) {
                return Err(SpecError::TraversalFile(file.clone()));
            }
        }
        Ok(())
    }

    /// Serialize the spec to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Yaml`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, SpecError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse a spec from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Yaml`] if the document does not parse.
    pub fn from_yaml(yaml: &str) -> Result<Self, SpecError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
