//! Assembles the outer package archive from a specification.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use tar::{Builder as TarBuilder, Header};

use sealpkg_core::spec::PackageSpec;
use sealpkg_crypto::cert::CertSource;
use sealpkg_crypto::key::KeySource;
use sealpkg_crypto::signer::{Signer, SignerOptions};

use crate::digest_io::DigestingWriter;
use crate::error::PackError;
use crate::{DATA_TAR_GZ, METADATA_GZ, SIG_SUFFIX};

/// Assembles a package archive: serialized spec, compressed payload, and one
/// detached-signature sidecar per member when a signing key is configured.
///
/// The builder works on its own copy of the spec; the caller's spec is never
/// mutated, and the signing key is cleared from the copy before it is
/// serialized.
pub struct PackageBuilder {
    spec: PackageSpec,
    source_dir: PathBuf,
    signer_options: SignerOptions,
}

impl PackageBuilder {
    /// Create a builder for `spec`, reading payload files relative to
    /// `source_dir`.
    #[must_use]
    pub fn new(spec: &PackageSpec, source_dir: &Path) -> Self {
        Self {
            spec: spec.clone(),
            source_dir: source_dir.to_path_buf(),
            signer_options: SignerOptions::default(),
        }
    }

    /// Override the signer's conventional paths and trust directory.
    #[must_use]
    pub fn with_signer_options(mut self, options: SignerOptions) -> Self {
        self.signer_options = options;
        self
    }

    /// Build the archive at `output_path`.
    ///
    /// Members are emitted in order: `metadata.gz`, its `.sig` when signed,
    /// `data.tar.gz`, its `.sig` when signed. Payload files are stored with
    /// their on-disk permission bits and sizes. A failed build may leave a
    /// partial file at `output_path`; deleting it is the caller's
    /// responsibility.
    ///
    /// # Errors
    ///
    /// Returns [`PackError`] if the spec fails validation, a payload file
    /// cannot be read, signing fails, or the archive cannot be written.
    pub fn build(mut self, output_path: &Path) -> Result<PathBuf, PackError> {
        self.spec.validate()?;
        let mut signer = self.make_signer()?;

        // The signing key must never reach the serialized form; the chain is
        // replaced with the signer's closed chain (or attached for display
        // on unsigned builds that have a default certificate).
        self.spec.signing_key = None;
        if !signer.chain().is_empty() {
            self.spec.cert_chain = signer.chain().to_pem_list();
        }

        let out_file = File::create(output_path)?;
        let mut outer = TarBuilder::new(out_file);

        self.append_metadata(&mut outer, &mut signer)?;
        self.append_payload(&mut outer, &mut signer)?;

        outer.finish()?;
        info!(
            "built {} v{} at {}",
            self.spec.name,
            self.spec.version,
            output_path.display()
        );
        Ok(output_path.to_path_buf())
    }

    fn make_signer(&self) -> Result<Signer, PackError> {
        let signer = match &self.spec.signing_key {
            Some(key_path) => {
                let chain = if self.spec.cert_chain.is_empty() {
                    None
                } else {
                    Some(
                        self.spec
                            .cert_chain
                            .iter()
                            .map(|element| CertSource::detect(element))
                            .collect(),
                    )
                };
                Signer::new(
                    Some(KeySource::Path(key_path.clone())),
                    chain,
                    self.signer_options.clone(),
                )?
            }
            None => Signer::unsigned(None, self.signer_options.clone())?,
        };
        Ok(signer)
    }

    fn append_metadata(
        &self,
        outer: &mut TarBuilder<File>,
        signer: &mut Signer,
    ) -> Result<(), PackError> {
        let yaml = self.spec.to_yaml()?;
        let writer = DigestingWriter::new(Vec::new(), signer.algorithm());
        let mut encoder = GzEncoder::new(writer, Compression::best());
        encoder.write_all(yaml.as_bytes())?;
        let writer = encoder.finish()?;
        let (bytes, signed) = writer.finish(Some(signer))?;

        append_member(outer, METADATA_GZ, &bytes)?;
        if let Some(signature) = &signed.signature {
            append_member(outer, &format!("{METADATA_GZ}{SIG_SUFFIX}"), signature)?;
        }
        Ok(())
    }

    fn append_payload(
        &self,
        outer: &mut TarBuilder<File>,
        signer: &mut Signer,
    ) -> Result<(), PackError> {
        // The inner tar is staged in an unlinked temp file so its bytes are
        // digested exactly once, on the way in.
        let staging = tempfile::tempfile()?;
        let writer = DigestingWriter::new(staging, signer.algorithm());
        let encoder = GzEncoder::new(writer, Compression::best());
        let mut inner = TarBuilder::new(encoder);

        for file in &self.spec.files {
            let path = self.source_dir.join(file);
            debug!("packing: {}", path.display());
            inner.append_path_with_name(&path, file)?;
        }

        let encoder = inner.into_inner()?;
        let writer = encoder.finish()?;
        let (mut staging, signed) = writer.finish(Some(signer))?;

        staging.seek(SeekFrom::Start(0))?;
        let size = staging.metadata()?.len();
        let mut header = Header::new_gnu();
        header.set_size(size);
        header.set_mode(0o444);
        outer.append_data(&mut header, DATA_TAR_GZ, &mut staging)?;

        if let Some(signature) = &signed.signature {
            append_member(outer, &format!("{DATA_TAR_GZ}{SIG_SUFFIX}"), signature)?;
        }
        Ok(())
    }
}

fn append_member(
    outer: &mut TarBuilder<File>,
    name: &str,
    bytes: &[u8],
) -> Result<(), PackError> {
    let mut header = Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o444);
    outer.append_data(&mut header, name, bytes)?;
    Ok(())
}
