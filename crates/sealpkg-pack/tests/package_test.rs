use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use semver::Version;
use tar::Archive;
use tempfile::TempDir;

use sealpkg_core::spec::PackageSpec;
use sealpkg_crypto::digest::DigestAlgorithm;
use sealpkg_crypto::error::PolicyError;
use sealpkg_crypto::issue::{issue_self_signed, CertSubject};
use sealpkg_crypto::policy::Policy;
use sealpkg_crypto::signer::SignerOptions;
use sealpkg_crypto::store::TrustStore;
use sealpkg_pack::builder::PackageBuilder;
use sealpkg_pack::error::PackError;
use sealpkg_pack::reader::PackageReader;

fn options_in(work: &TempDir) -> SignerOptions {
    SignerOptions {
        key_path: work.path().join("sealpkg-private_key.pem"),
        cert_path: work.path().join("sealpkg-public_cert.pem"),
        trust_dir: work.path().join("trusted"),
        renew_validity_days: 365,
    }
}

fn demo_spec() -> PackageSpec {
    let mut spec =
        PackageSpec::new("demo", Version::new(1, 0, 0), "A demonstration package").unwrap();
    spec.files = vec!["a.txt".to_owned(), "b/c.txt".to_owned()];
    spec
}

fn populate_source(work: &TempDir) -> PathBuf {
    let source = work.path().join("src");
    fs::create_dir_all(source.join("b")).unwrap();
    fs::write(source.join("a.txt"), "hello\n").unwrap();
    fs::write(source.join("b").join("c.txt"), "world\n").unwrap();
    source
}

/// Build a signed package with a ten-year self-signed certificate whose root
/// is installed in the work dir's trust store.
fn build_signed(work: &TempDir) -> PathBuf {
    let source = populate_source(work);

    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let cert = issue_self_signed(&key, &CertSubject::common_name("packager"), 3650).unwrap();
    let key_path = work.path().join("signing-key.pem");
    fs::write(
        &key_path,
        key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
    )
    .unwrap();
    TrustStore::new(work.path().join("trusted"))
        .add(&cert)
        .unwrap();

    let mut spec = demo_spec();
    spec.signing_key = Some(key_path);
    spec.cert_chain = vec![cert.to_pem()];

    let archive = work.path().join("demo-1.0.0.pkg");
    PackageBuilder::new(&spec, &source)
        .with_signer_options(options_in(work))
        .build(&archive)
        .unwrap();
    archive
}

fn build_unsigned(work: &TempDir) -> PathBuf {
    let source = populate_source(work);
    let archive = work.path().join("demo-1.0.0.pkg");
    PackageBuilder::new(&demo_spec(), &source)
        .with_signer_options(options_in(work))
        .build(&archive)
        .unwrap();
    archive
}

fn read_members(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = Archive::new(File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            (name, body)
        })
        .collect()
}

fn write_outer(path: &Path, members: &[(&str, &[u8])]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    for (name, bytes) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o444);
        builder.append_data(&mut header, name, *bytes).unwrap();
    }
    builder.finish().unwrap();
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn metadata_gz() -> Vec<u8> {
    let mut spec = demo_spec();
    spec.files = vec!["payload.txt".to_owned()];
    gzip_bytes(spec.to_yaml().unwrap().as_bytes())
}

/// A one-file inner tar whose first entry header is rewritten to `name`,
/// bypassing the write-side path checks a well-behaved builder performs.
fn inner_tar_named(name: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "payload.txt", &b"data\n"[..])
        .unwrap();
    let mut bytes = builder.into_inner().unwrap();

    let header = &mut bytes[..512];
    header[..100].fill(0);
    header[..name.len()].copy_from_slice(name);
    header[148..156].fill(b' ');
    let sum: u32 = header.iter().map(|&b| u32::from(b)).sum();
    header[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
    bytes
}

fn flip_byte_in_member(path: &Path, member: &str, offset_in_member: u64) {
    let mut archive = Archive::new(File::open(path).unwrap());
    let mut position = None;
    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        if String::from_utf8_lossy(&entry.path_bytes()) == member {
            position = Some(entry.raw_file_position() + offset_in_member);
            break;
        }
    }
    let position = usize::try_from(position.expect("member not found")).unwrap();
    let mut bytes = fs::read(path).unwrap();
    bytes[position] ^= 0xff;
    fs::write(path, bytes).unwrap();
}

#[test]
fn signed_round_trip_under_high_security() {
    let work = TempDir::new().unwrap();
    let archive = build_signed(&work);

    let policy = Policy::high_security().with_trust_dir(work.path().join("trusted"));
    let mut reader = PackageReader::with_policy(&archive, policy);
    reader.verify().unwrap();

    assert_eq!(
        reader.files(),
        [
            "metadata.gz",
            "metadata.gz.sig",
            "data.tar.gz",
            "data.tar.gz.sig"
        ]
    );
    let spec = reader.spec().unwrap();
    assert_eq!(spec.name.as_str(), "demo");
    assert_eq!(spec.version, Version::new(1, 0, 0));
    assert!(spec.signing_key.is_none());
    assert_eq!(spec.cert_chain.len(), 1);

    let dest = work.path().join("out");
    reader.extract(&dest).unwrap();
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello\n");
    assert_eq!(
        fs::read_to_string(dest.join("b").join("c.txt")).unwrap(),
        "world\n"
    );
}

#[test]
fn extraction_replaces_existing_files() {
    let work = TempDir::new().unwrap();
    let archive = build_signed(&work);
    let dest = work.path().join("out");
    fs::create_dir_all(dest.join("b")).unwrap();
    fs::write(dest.join("a.txt"), "stale contents").unwrap();

    PackageReader::new(&archive).extract(&dest).unwrap();
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello\n");
}

#[cfg(unix)]
#[test]
fn extraction_preserves_mode_bits() {
    use std::os::unix::fs::PermissionsExt;

    let work = TempDir::new().unwrap();
    let source = work.path().join("src");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("run.sh"), "#!/bin/sh\n").unwrap();
    fs::set_permissions(source.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();

    let mut spec = demo_spec();
    spec.files = vec!["run.sh".to_owned()];
    let archive = work.path().join("demo.pkg");
    PackageBuilder::new(&spec, &source)
        .with_signer_options(options_in(&work))
        .build(&archive)
        .unwrap();

    let dest = work.path().join("out");
    PackageReader::new(&archive).extract(&dest).unwrap();
    let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
    assert_eq!(mode & 0o755, 0o755);
}

#[test]
fn unsigned_package_is_rejected_by_high_security_only() {
    let work = TempDir::new().unwrap();
    let archive = build_unsigned(&work);

    let err = PackageReader::with_policy(&archive, Policy::high_security())
        .verify()
        .unwrap_err();
    assert!(matches!(
        err,
        PackError::Policy(PolicyError::UnsignedRejected)
    ));

    PackageReader::with_policy(&archive, Policy::no_security())
        .verify()
        .unwrap();
}

#[test]
fn unsigned_build_attaches_the_conventional_certificate_for_display() {
    let work = TempDir::new().unwrap();
    let options = options_in(&work);
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let cert = issue_self_signed(&key, &CertSubject::common_name("display"), 3650).unwrap();
    fs::write(&options.cert_path, cert.to_pem()).unwrap();

    let archive = build_unsigned(&work);
    let mut reader = PackageReader::new(&archive);
    reader.verify().unwrap();
    let chain = &reader.spec().unwrap().cert_chain;
    assert_eq!(chain.len(), 1);
    assert!(chain[0].contains("BEGIN CERTIFICATE"));
}

#[test]
fn tampered_payload_fails_the_gzip_integrity_scan() {
    let work = TempDir::new().unwrap();
    let archive = build_signed(&work);
    flip_byte_in_member(&archive, "data.tar.gz", 20);

    let err = PackageReader::new(&archive).verify().unwrap_err();
    assert!(matches!(err, PackError::Format(_)));
}

#[test]
fn tampered_signature_sidecar_is_a_bad_signature() {
    let work = TempDir::new().unwrap();
    let archive = build_signed(&work);
    flip_byte_in_member(&archive, "data.tar.gz.sig", 4);

    let err = PackageReader::with_policy(&archive, Policy::medium_security())
        .verify()
        .unwrap_err();
    assert!(matches!(
        err,
        PackError::Policy(PolicyError::BadSignature { .. })
    ));
}

#[test]
fn sidecars_are_recognized_in_any_position() {
    let work = TempDir::new().unwrap();
    let archive = build_signed(&work);

    // Rewrite the archive with every sidecar ahead of the member it covers.
    let members = read_members(&archive);
    let mut reordered: Vec<&(String, Vec<u8>)> = Vec::new();
    for member in &members {
        if member.0.ends_with(".sig") {
            reordered.insert(0, member);
        } else {
            reordered.push(member);
        }
    }
    let shuffled: Vec<(&str, &[u8])> = reordered
        .iter()
        .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
        .collect();
    write_outer(&archive, &shuffled);

    let policy = Policy::high_security().with_trust_dir(work.path().join("trusted"));
    PackageReader::with_policy(&archive, policy).verify().unwrap();
}

#[test]
fn absolute_entry_path_is_rejected_at_extraction() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("evil.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"/etc/passwd"));
    write_outer(
        &archive,
        &[
            ("metadata.gz", &metadata_gz()),
            ("data.tar.gz", &payload),
        ],
    );

    let err = PackageReader::new(&archive)
        .extract(&work.path().join("out"))
        .unwrap_err();
    assert!(matches!(err, PackError::UnsafePath(_)));
    assert!(!work.path().join("out").join("etc").exists());
}

#[test]
fn traversing_entry_path_is_rejected_at_extraction() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("evil.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"../escape.txt"));
    write_outer(
        &archive,
        &[
            ("metadata.gz", &metadata_gz()),
            ("data.tar.gz", &payload),
        ],
    );

    let err = PackageReader::new(&archive)
        .extract(&work.path().join("out"))
        .unwrap_err();
    assert!(matches!(err, PackError::UnsafePath(_)));
    assert!(!work.path().join("escape.txt").exists());
}

#[test]
fn missing_metadata_member_is_a_format_error() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("bad.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"payload.txt"));
    write_outer(&archive, &[("data.tar.gz", &payload)]);

    let err = PackageReader::new(&archive).verify().unwrap_err();
    assert!(err.to_string().contains("package metadata is missing"));
}

#[test]
fn missing_payload_member_is_a_format_error() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("bad.pkg");
    write_outer(&archive, &[("metadata.gz", &metadata_gz())]);

    let err = PackageReader::new(&archive).verify().unwrap_err();
    assert!(err.to_string().contains("package content missing"));
}

#[test]
fn matching_checksum_sidecar_passes() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("sums.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"payload.txt"));
    let digest = DigestAlgorithm::Sha256.digest(&payload);
    let sum_line = format!("SHA256\t{}\n", digest.hex());
    write_outer(
        &archive,
        &[
            ("metadata.gz", &metadata_gz()),
            ("data.tar.gz", &payload),
            ("data.tar.gz.sum", sum_line.as_bytes()),
        ],
    );

    PackageReader::new(&archive).verify().unwrap();
}

#[test]
fn mismatched_checksum_sidecar_fails() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("sums.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"payload.txt"));
    let sum_line = format!("SHA256\t{}\n", "0".repeat(64));
    write_outer(
        &archive,
        &[
            ("metadata.gz", &metadata_gz()),
            ("data.tar.gz", &payload),
            ("data.tar.gz.sum", sum_line.as_bytes()),
        ],
    );

    let err = PackageReader::new(&archive).verify().unwrap_err();
    assert!(err.to_string().contains("checksum mismatch for 'data.tar.gz'"));
}

#[test]
fn checksum_with_a_different_available_algorithm_is_recomputed() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("sums.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"payload.txt"));
    let digest = DigestAlgorithm::Sha512.digest(&payload);
    let sum_line = format!("SHA512\t{}\n", digest.hex());
    write_outer(
        &archive,
        &[
            ("metadata.gz", &metadata_gz()),
            ("data.tar.gz", &payload),
            ("data.tar.gz.sum", sum_line.as_bytes()),
        ],
    );

    PackageReader::new(&archive).verify().unwrap();
}

#[test]
fn checksum_with_an_unknown_algorithm_is_advisory_and_skipped() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("sums.pkg");
    let payload = gzip_bytes(&inner_tar_named(b"payload.txt"));
    write_outer(
        &archive,
        &[
            ("metadata.gz", &metadata_gz()),
            ("data.tar.gz", &payload),
            ("data.tar.gz.sum", b"BLAKE3\tdeadbeef\n"),
        ],
    );

    PackageReader::new(&archive).verify().unwrap();
}

#[test]
fn legacy_marker_is_detected() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("legacy.pkg");
    fs::write(&archive, b"MD5SUM = 0123456789abcdef").unwrap();

    let err = PackageReader::new(&archive).verify().unwrap_err();
    assert!(matches!(err, PackError::Legacy));
}

#[test]
fn verify_is_repeatable_on_the_same_reader() {
    let work = TempDir::new().unwrap();
    let archive = build_signed(&work);
    let policy = Policy::high_security().with_trust_dir(work.path().join("trusted"));
    let mut reader = PackageReader::with_policy(&archive, policy);
    reader.verify().unwrap();
    reader.verify().unwrap();
    assert_eq!(reader.files().len(), 4);
}
