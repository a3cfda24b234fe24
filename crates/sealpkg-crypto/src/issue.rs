//! Certificate issuance: self-signed roots and CA-signed certificates.

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls_pki_types::CertificateDer;
use time::{Duration as TimeDuration, OffsetDateTime};
use x509_parser::oid_registry::{
    OID_X509_COMMON_NAME, OID_X509_COUNTRY_NAME, OID_X509_LOCALITY_NAME,
    OID_X509_ORGANIZATIONAL_UNIT, OID_X509_ORGANIZATION_NAME, OID_X509_STATE_OR_PROVINCE_NAME,
};
use x509_parser::parse_x509_certificate;

use crate::cert::Certificate;
use crate::error::CryptoError;

/// Subject attributes carried into an issued certificate.
#[derive(Debug, Clone, Default)]
pub struct CertSubject {
    /// Common name (CN).
    pub common_name: Option<String>,
    /// Organization (O).
    pub organization: Option<String>,
    /// Organizational unit (OU).
    pub organizational_unit: Option<String>,
    /// Country (C).
    pub country: Option<String>,
    /// State or province (ST).
    pub state: Option<String>,
    /// Locality (L).
    pub locality: Option<String>,
}

impl CertSubject {
    /// A subject consisting of only a common name.
    #[must_use]
    pub fn common_name(cn: &str) -> Self {
        Self {
            common_name: Some(cn.to_owned()),
            ..Self::default()
        }
    }

    /// Extract the subject attributes of an existing certificate, so a
    /// renewed certificate can name the same entity.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::X509`] if the certificate fails to re-parse.
    pub fn from_certificate(cert: &Certificate) -> Result<Self, CryptoError> {
        let (_, parsed) =
            parse_x509_certificate(cert.der()).map_err(|e| CryptoError::X509(e.to_string()))?;
        let mut subject = Self::default();
        for attr in parsed.subject().iter_attributes() {
            let value = attr
                .as_str()
                .map_err(|e| CryptoError::X509(e.to_string()))?
                .to_owned();
            let oid = attr.attr_type();
            if *oid == OID_X509_COMMON_NAME {
                subject.common_name = Some(value);
            } else if *oid == OID_X509_ORGANIZATION_NAME {
                subject.organization = Some(value);
            } else if *oid == OID_X509_ORGANIZATIONAL_UNIT {
                subject.organizational_unit = Some(value);
            } else if *oid == OID_X509_COUNTRY_NAME {
                subject.country = Some(value);
            } else if *oid == OID_X509_STATE_OR_PROVINCE_NAME {
                subject.state = Some(value);
            } else if *oid == OID_X509_LOCALITY_NAME {
                subject.locality = Some(value);
            }
        }
        Ok(subject)
    }

    fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        if let Some(cn) = &self.common_name {
            dn.push(DnType::CommonName, cn.as_str());
        }
        if let Some(o) = &self.organization {
            dn.push(DnType::OrganizationName, o.as_str());
        }
        if let Some(ou) = &self.organizational_unit {
            dn.push(DnType::OrganizationalUnitName, ou.as_str());
        }
        if let Some(c) = &self.country {
            dn.push(DnType::CountryName, c.as_str());
        }
        if let Some(st) = &self.state {
            dn.push(DnType::StateOrProvinceName, st.as_str());
        }
        if let Some(l) = &self.locality {
            dn.push(DnType::LocalityName, l.as_str());
        }
        dn
    }
}

/// Issue a self-signed certificate over `key`, valid from now for
/// `validity_days`.
///
/// # Errors
///
/// Returns [`CryptoError::CertGen`] if issuance fails.
pub fn issue_self_signed(
    key: &RsaPrivateKey,
    subject: &CertSubject,
    validity_days: i64,
) -> Result<Certificate, CryptoError> {
    let now = OffsetDateTime::now_utc();
    issue_self_signed_window(key, subject, now, now + TimeDuration::days(validity_days))
}

/// Issue a self-signed certificate with an explicit validity window.
///
/// The window may be placed entirely in the past, which is how expiry paths
/// are exercised in tests.
///
/// # Errors
///
/// Returns [`CryptoError::CertGen`] if issuance fails.
pub fn issue_self_signed_at(
    key: &RsaPrivateKey,
    subject: &CertSubject,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<Certificate, CryptoError> {
    issue_self_signed_window(key, subject, to_offset(not_before)?, to_offset(not_after)?)
}

fn issue_self_signed_window(
    key: &RsaPrivateKey,
    subject: &CertSubject,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<Certificate, CryptoError> {
    let key_pair = rcgen_keypair(key)?;
    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    params.not_before = not_before;
    params.not_after = not_after;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::CertGen(e.to_string()))?;
    Certificate::from_der(cert.der().to_vec())
}

/// Issue a certificate over `key` signed by `issuer`, valid from now for
/// `validity_days`.
///
/// # Errors
///
/// Returns [`CryptoError::CertGen`] if issuance fails.
pub fn issue_signed_by(
    key: &RsaPrivateKey,
    subject: &CertSubject,
    validity_days: i64,
    issuer: &Certificate,
    issuer_key: &RsaPrivateKey,
) -> Result<Certificate, CryptoError> {
    let key_pair = rcgen_keypair(key)?;
    let issuer_key_pair = rcgen_keypair(issuer_key)?;

    let now = OffsetDateTime::now_utc();
    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    params.not_before = now;
    params.not_after = now + TimeDuration::days(validity_days);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];

    let issuer_der = CertificateDer::from(issuer.der().to_vec());
    let issuer_params = CertificateParams::from_ca_cert_der(&issuer_der)
        .map_err(|e| CryptoError::CertGen(e.to_string()))?;
    let issuer_cert = issuer_params
        .self_signed(&issuer_key_pair)
        .map_err(|e| CryptoError::CertGen(e.to_string()))?;

    let cert = params
        .signed_by(&key_pair, &issuer_cert, &issuer_key_pair)
        .map_err(|e| CryptoError::CertGen(e.to_string()))?;
    Certificate::from_der(cert.der().to_vec())
}

fn rcgen_keypair(key: &RsaPrivateKey) -> Result<KeyPair, CryptoError> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Key(e.to_string()))?;
    KeyPair::from_pem(&pem).map_err(|e| CryptoError::CertGen(e.to_string()))
}

fn to_offset(time: DateTime<Utc>) -> Result<OffsetDateTime, CryptoError> {
    OffsetDateTime::from_unix_timestamp(time.timestamp())
        .map_err(|e| CryptoError::CertGen(e.to_string()))
}
