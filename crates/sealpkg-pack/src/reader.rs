//! Streams package archives: verification and safe extraction.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, info};
use tar::Archive;

use sealpkg_core::spec::PackageSpec;
use sealpkg_crypto::digest::{Digest, DigestAlgorithm};
use sealpkg_crypto::policy::Policy;

use crate::digest_io::{drain, DigestingReader, CHUNK_SIZE};
use crate::error::PackError;
use crate::{DATA_TAR_GZ, METADATA, METADATA_GZ, SIG_SUFFIX, SUM_SUFFIX};

/// Marker near the head of archives produced by the long-retired original
/// format.
const LEGACY_MARKER: &[u8] = b"MD5SUM =";

/// Streams a package archive, collecting digests, signatures, and checksums,
/// and delegating signature policy to an attached [`Policy`].
pub struct PackageReader {
    path: PathBuf,
    policy: Option<Policy>,
    algorithm: DigestAlgorithm,
    spec: Option<PackageSpec>,
    files: Vec<String>,
    digests: HashMap<String, Digest>,
    signatures: HashMap<String, Vec<u8>>,
    checksums: HashMap<String, String>,
}

impl PackageReader {
    /// Open a reader over the archive at `path` with no security policy.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            policy: None,
            algorithm: DigestAlgorithm::default(),
            spec: None,
            files: Vec::new(),
            digests: HashMap::new(),
            signatures: HashMap::new(),
            checksums: HashMap::new(),
        }
    }

    /// Open a reader that verifies signatures under `policy`.
    #[must_use]
    pub fn with_policy(path: &Path, policy: Policy) -> Self {
        let mut reader = Self::new(path);
        reader.policy = Some(policy);
        reader
    }

    /// The spec parsed from the archive's metadata member, once
    /// [`Self::verify`] has run.
    #[must_use]
    pub fn spec(&self) -> Option<&PackageSpec> {
        self.spec.as_ref()
    }

    /// The full names of every outer archive entry, in archive order, once
    /// [`Self::verify`] has run.
    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Scan the archive: classify entries, collect digests and sidecars,
    /// parse the metadata, check gzip framing of the payload, verify
    /// checksums, and evaluate the attached policy.
    ///
    /// All collected state is reset at entry, so calling this twice is safe.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Legacy`] for old-format files,
    /// [`PackError::Format`] for structural problems, and
    /// [`PackError::Policy`] when the attached policy rejects the package.
    pub fn verify(&mut self) -> Result<(), PackError> {
        self.spec = None;
        self.files = Vec::new();
        self.digests = HashMap::new();
        self.signatures = HashMap::new();
        self.checksums = HashMap::new();

        if self.is_legacy()? {
            return Err(PackError::Legacy);
        }

        let file = File::open(&self.path)?;
        let mut archive = Archive::new(file);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry_name(&entry);
            self.files.push(name.clone());
            debug!("scanning entry {name}");

            if let Some(base) = name.strip_suffix(SIG_SUFFIX) {
                if self.policy.is_some() {
                    let mut body = Vec::new();
                    entry.read_to_end(&mut body)?;
                    self.signatures.insert(base.to_owned(), body);
                }
                continue;
            }
            if let Some(base) = name.strip_suffix(SUM_SUFFIX) {
                let mut body = String::new();
                entry.read_to_string(&mut body)?;
                self.checksums.insert(base.to_owned(), body);
                continue;
            }

            if name == METADATA || name == METADATA_GZ {
                let mut reader = DigestingReader::new(&mut entry, self.algorithm);
                let mut body = Vec::new();
                reader.read_to_end(&mut body)?;
                let (_, digest) = reader.finish();
                self.digests.insert(name.clone(), digest);
                self.spec = Some(parse_metadata(&name, &body)?);
            } else if name == DATA_TAR_GZ {
                let reader = DigestingReader::new(&mut entry, self.algorithm);
                let mut decoder = GzDecoder::new(reader);
                drain(&mut decoder).map_err(|e| {
                    PackError::Format(format!("corrupt {DATA_TAR_GZ} in {}: {e}", self.path.display()))
                })?;
                let mut reader = decoder.into_inner();
                drain(&mut reader)?;
                let (_, digest) = reader.finish();
                self.digests.insert(name.clone(), digest);
            } else {
                let mut reader = DigestingReader::new(&mut entry, self.algorithm);
                drain(&mut reader)?;
                let (_, digest) = reader.finish();
                self.digests.insert(name.clone(), digest);
            }
        }

        let Some(spec) = self.spec.as_ref() else {
            return Err(PackError::Format("package metadata is missing".to_owned()));
        };
        if !self.digests.contains_key(DATA_TAR_GZ) {
            return Err(PackError::Format("package content missing".to_owned()));
        }

        self.verify_checksums()?;

        if let Some(policy) = &self.policy {
            policy.verify_signatures(spec, &self.digests, &self.signatures)?;
        }
        Ok(())
    }

    /// Extract the payload into `destination`, creating it if needed.
    ///
    /// Runs [`Self::verify`] first when it has not run yet. Every entry path
    /// is mapped through [`install_location`]; entries that would land
    /// outside the destination are rejected before anything is written.
    /// Existing files are replaced and mode bits are applied from the entry
    /// headers.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::UnsafePath`] for absolute or escaping entry
    /// paths, and [`PackError`] for any verification or I/O failure.
    pub fn extract(&mut self, destination: &Path) -> Result<(), PackError> {
        if self.spec.is_none() {
            self.verify()?;
        }
        fs::create_dir_all(destination)?;
        let destination = fs::canonicalize(destination)?;

        let file = File::open(&self.path)?;
        let mut archive = Archive::new(file);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry_name(&entry) != DATA_TAR_GZ {
                continue;
            }
            let decoder = GzDecoder::new(&mut entry);
            let mut inner = Archive::new(decoder);
            for inner_entry in inner.entries()? {
                let mut inner_entry = inner_entry?;
                let name = entry_name(&inner_entry);
                let target = install_location(&name, &destination)?;
                if inner_entry.header().entry_type().is_dir() {
                    fs::create_dir_all(&target)?;
                    continue;
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                if target.exists() {
                    fs::remove_file(&target)?;
                }
                write_file(&mut inner_entry, &target)?;
                debug!("extracted {}", target.display());
            }
            info!("extracted payload into {}", destination.display());
            return Ok(());
        }
        Err(PackError::Format("package content missing".to_owned()))
    }

    fn is_legacy(&self) -> Result<bool, PackError> {
        let mut head = Vec::with_capacity(20);
        File::open(&self.path)?.take(20).read_to_end(&mut head)?;
        Ok(head
            .windows(LEGACY_MARKER.len())
            .any(|window| window == LEGACY_MARKER))
    }

    /// Cross-check every `.sum` sidecar against a digest of the named
    /// member, recomputing under the named algorithm when it differs from
    /// the scan's. Unknown algorithms are skipped: checksums are advisory,
    /// not security-bearing.
    fn verify_checksums(&self) -> Result<(), PackError> {
        for (name, line) in &self.checksums {
            let Some((algorithm_name, expected)) = line.split_once('\t') else {
                return Err(PackError::Format(format!(
                    "malformed checksum line for '{name}'"
                )));
            };
            let Some(algorithm) = DigestAlgorithm::from_name(algorithm_name) else {
                debug!("ignoring checksum for '{name}': unknown algorithm '{algorithm_name}'");
                continue;
            };
            let actual = match self.digests.get(name) {
                Some(digest) if digest.algorithm() == algorithm => digest.clone(),
                _ => self.digest_member(name, algorithm)?,
            };
            if !actual.hex().eq_ignore_ascii_case(expected.trim_end()) {
                return Err(PackError::Format(format!("checksum mismatch for '{name}'")));
            }
        }
        Ok(())
    }

    /// Digest one member of the outer archive under an explicit algorithm.
    fn digest_member(
        &self,
        member: &str,
        algorithm: DigestAlgorithm,
    ) -> Result<Digest, PackError> {
        let file = File::open(&self.path)?;
        let mut archive = Archive::new(file);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry_name(&entry) == member {
                let mut reader = DigestingReader::new(&mut entry, algorithm);
                drain(&mut reader)?;
                let (_, digest) = reader.finish();
                return Ok(digest);
            }
        }
        Err(PackError::Format(format!(
            "checksum names missing member '{member}'"
        )))
    }
}

/// Map an inner-archive entry path to its extraction target under
/// `destination`.
///
/// Paths already under the destination pass through unchanged, which makes
/// the mapping idempotent. Any other absolute path, and any path whose
/// normalized form would leave the destination, is rejected.
///
/// # Errors
///
/// Returns [`PackError::UnsafePath`] for rejected paths.
pub fn install_location(name: &str, destination: &Path) -> Result<PathBuf, PackError> {
    let path = Path::new(name);
    if path.starts_with(destination) {
        return Ok(path.to_path_buf());
    }
    if path.is_absolute() {
        return Err(PackError::UnsafePath(name.to_owned()));
    }

    let mut target = destination.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => return Err(PackError::UnsafePath(name.to_owned())),
        }
    }
    if !target.starts_with(destination) {
        return Err(PackError::UnsafePath(name.to_owned()));
    }
    Ok(target)
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> String {
    String::from_utf8_lossy(&entry.path_bytes()).into_owned()
}

fn parse_metadata(name: &str, body: &[u8]) -> Result<PackageSpec, PackError> {
    let yaml = if name == METADATA_GZ {
        let mut decoder = GzDecoder::new(body);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| PackError::Format(format!("corrupt {name}: {e}")))?;
        text
    } else {
        String::from_utf8(body.to_vec())
            .map_err(|e| PackError::Format(format!("metadata is not UTF-8: {e}")))?
    };
    Ok(PackageSpec::from_yaml(&yaml)?)
}

fn write_file<R: Read>(entry: &mut tar::Entry<'_, R>, target: &Path) -> Result<(), PackError> {
    let mut out = File::create(target)?;
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let read = entry.read(&mut buf)?;
        if read == 0 {
            break;
        }
        out.write_all(&buf[..read])?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(mode) = entry.header().mode() {
            fs::set_permissions(target, fs::Permissions::from_mode(mode))?;
        }
    }
    // Tolerate filesystems without fsync support.
    let _ = out.sync_all();
    Ok(())
}
