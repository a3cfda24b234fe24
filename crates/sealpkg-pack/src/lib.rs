//! The signed package container: build, verify, and extract archives.
#![deny(warnings, clippy::all, clippy::pedantic)]
#![warn(missing_docs)]

pub mod builder;
pub mod digest_io;
pub mod error;
pub mod reader;

/// Name of the plain serialized-spec member of the outer archive.
pub const METADATA: &str = "metadata";

/// Name of the gzip-compressed serialized-spec member of the outer archive.
pub const METADATA_GZ: &str = "metadata.gz";

/// Name of the compressed payload member of the outer archive.
pub const DATA_TAR_GZ: &str = "data.tar.gz";

/// Suffix of detached-signature sidecar members.
pub const SIG_SUFFIX: &str = ".sig";

/// Suffix of checksum sidecar members.
pub const SUM_SUFFIX: &str = ".sum";
