//! Pass-through I/O wrappers that digest bytes as they flow.
//!
//! These are the mechanism by which the builder produces `.sig` sidecars and
//! the reader checks member digests without ever buffering member contents a
//! second time: every byte is fed into the digest on its way through.

use std::io::{self, Read, Write};

use sealpkg_crypto::digest::{Digest, DigestAlgorithm, Hasher};
use sealpkg_crypto::error::CryptoError;
use sealpkg_crypto::signer::Signer;

/// Chunk size for streaming copies and digests.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// The result of closing a digesting stream: the final digest and, when a
/// signing [`Signer`] was supplied, a detached signature over its bytes.
#[derive(Debug, Clone)]
pub struct SignedDigest {
    /// Digest of every byte that passed through the stream.
    pub digest: Digest,
    /// Detached signature over the digest bytes; absent for unsigned streams.
    pub signature: Option<Vec<u8>>,
}

/// A writer that feeds every byte through a digest on its way to the inner
/// writer.
#[derive(Debug)]
pub struct DigestingWriter<W: Write> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> DigestingWriter<W> {
    /// Wrap `inner`, digesting with `algorithm`.
    pub fn new(inner: W, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
        }
    }

    /// Close the stream: return the inner writer together with the final
    /// digest and, when `signer` is given and holds a key, a detached
    /// signature over the digest bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if signing fails.
    pub fn finish(self, signer: Option<&mut Signer>) -> Result<(W, SignedDigest), CryptoError> {
        let Self { inner, hasher } = self;
        let digest = hasher.finish();
        let signature = match signer {
            Some(signer) => signer.sign(digest.bytes())?,
            None => None,
        };
        Ok((inner, SignedDigest { digest, signature }))
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A reader that feeds every byte through a digest as it is consumed.
#[derive(Debug)]
pub struct DigestingReader<R: Read> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> DigestingReader<R> {
    /// Wrap `inner`, digesting with `algorithm`.
    pub fn new(inner: R, algorithm: DigestAlgorithm) -> Self {
        Self {
            inner,
            hasher: algorithm.hasher(),
        }
    }

    /// Close the stream, returning the inner reader and the final digest
    /// over everything read so far.
    #[must_use]
    pub fn finish(self) -> (R, Digest) {
        (self.inner, self.hasher.finish())
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}

/// Read `reader` to EOF in [`CHUNK_SIZE`] blocks, discarding the bytes.
pub(crate) fn drain<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            return Ok(total);
        }
        total += read as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writer_digest_covers_written_bytes() {
        let mut writer = DigestingWriter::new(Vec::new(), DigestAlgorithm::Sha256);
        writer.write_all(b"hello\n").unwrap();
        let (inner, signed) = writer.finish(None).unwrap();
        assert_eq!(inner, b"hello\n");
        assert_eq!(signed.digest, DigestAlgorithm::Sha256.digest(b"hello\n"));
        assert!(signed.signature.is_none());
    }

    #[test]
    fn reader_digest_covers_read_bytes() {
        let mut reader = DigestingReader::new(Cursor::new(b"hello\n"), DigestAlgorithm::Sha256);
        drain(&mut reader).unwrap();
        let (_, digest) = reader.finish();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(b"hello\n"));
    }

    #[test]
    fn drain_reports_the_byte_count() {
        let data = vec![7u8; CHUNK_SIZE * 2 + 5];
        let mut reader = DigestingReader::new(Cursor::new(data), DigestAlgorithm::Sha512);
        assert_eq!(drain(&mut reader).unwrap(), (CHUNK_SIZE * 2 + 5) as u64);
    }
}
