//! The CA certificate/private key pair handed to TLS collaborators.

use rcgen::{KeyPair, PKCS_RSA_SHA256};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

/// `rsaEncryption` (PKCS #1).
const RSA_ENCRYPTION: pkcs8::ObjectIdentifier =
    pkcs8::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Errors decoding persisted CA material.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed X.509 certificate: {0}")]
    Certificate(String),
    #[error("{0} trailing bytes after certificate")]
    TrailingData(usize),
    #[error("malformed PKCS#8 container: {0}")]
    Pkcs8(#[from] pkcs8::Error),
    #[error("PKCS#8 container holds a {0} key, expected rsaEncryption")]
    NotRsa(pkcs8::ObjectIdentifier),
    #[error("invalid RSA key: {0}")]
    Rsa(String),
}

/// Where a [`CertificateAuthority`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaOrigin {
    /// Read back from existing files, untouched.
    Recovered,
    /// Freshly generated and written to disk.
    Generated,
}

/// A parsed X.509 CA certificate.
///
/// Owns the DER bytes and keeps the fields collaborators care about; the full
/// structure is available through [`CaCertificate::parsed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCertificate {
    der: CertificateDer<'static>,
    serial: Vec<u8>,
    subject: String,
    issuer: String,
    common_name: Option<String>,
    organization: Option<String>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    is_ca: bool,
    subject_key_id: Option<Vec<u8>>,
    dns_names: Vec<String>,
    /// PKCS#1 `RSAPublicKey` from the subject public key info.
    public_key: Vec<u8>,
    /// DER `SubjectPublicKeyInfo`.
    spki: Vec<u8>,
}

impl CaCertificate {
    /// Parses a DER-encoded certificate. Trailing bytes are rejected.
    pub fn from_der(der: Vec<u8>) -> Result<Self, DecodeError> {
        let (rest, cert) =
            X509Certificate::from_der(&der).map_err(|e| DecodeError::Certificate(e.to_string()))?;
        if !rest.is_empty() {
            return Err(DecodeError::TrailingData(rest.len()));
        }

        let mut subject_key_id = None;
        let mut dns_names = Vec::new();
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(id) => {
                    subject_key_id = Some(id.0.to_vec());
                }
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        if let GeneralName::DNSName(dns) = name {
                            dns_names.push(dns.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        let spki = cert.public_key();
        Ok(Self {
            der: CertificateDer::from(der.clone()),
            serial: cert.raw_serial().to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            common_name: first_attr(cert.subject().iter_common_name()),
            organization: first_attr(cert.subject().iter_organization()),
            not_before: cert.validity().not_before.to_datetime(),
            not_after: cert.validity().not_after.to_datetime(),
            is_ca: cert.is_ca(),
            subject_key_id,
            dns_names,
            public_key: spki.subject_public_key.data.to_vec(),
            spki: spki.raw.to_vec(),
        })
    }

    /// Re-parses the certificate for inspection.
    pub fn parsed(&self) -> Result<X509Certificate<'_>, DecodeError> {
        let (_, cert) = X509Certificate::from_der(self.der.as_ref())
            .map_err(|e| DecodeError::Certificate(e.to_string()))?;
        Ok(cert)
    }

    pub fn der(&self) -> &[u8] {
        self.der.as_ref()
    }

    /// Raw big-endian serial number.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as an integer, if it fits in 64 bits.
    pub fn serial_u64(&self) -> Option<u64> {
        let start = self
            .serial
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(self.serial.len());
        let digits = &self.serial[start..];
        if digits.len() > 8 {
            return None;
        }
        Some(digits.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Whether the basic constraints extension marks this as a CA.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn subject_key_id(&self) -> Option<&[u8]> {
        self.subject_key_id.as_deref()
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// PKCS#1 encoded public key embedded in the certificate.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// DER `SubjectPublicKeyInfo` embedded in the certificate.
    pub fn spki_der(&self) -> &[u8] {
        &self.spki
    }

    /// Checks that issuer equals subject and the signature verifies against
    /// the certificate's own public key.
    pub fn verify_self_signed(&self) -> bool {
        if self.subject != self.issuer {
            return false;
        }
        match self.parsed() {
            Ok(cert) => cert.verify_signature(None).is_ok(),
            Err(_) => false,
        }
    }
}

fn first_attr<'a, 'b: 'a>(
    mut attrs: impl Iterator<Item = &'a x509_parser::x509::AttributeTypeAndValue<'b>>,
) -> Option<String> {
    attrs
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// RSA private key together with its PKCS#8 DER encoding.
pub struct CaPrivateKey {
    key: RsaPrivateKey,
    pkcs8: Vec<u8>,
}

impl CaPrivateKey {
    /// Wraps a freshly generated key, encoding it as PKCS#8.
    pub fn from_rsa(key: RsaPrivateKey) -> Result<Self, pkcs8::Error> {
        let pkcs8 = key.to_pkcs8_der()?.as_bytes().to_vec();
        Ok(Self { key, pkcs8 })
    }

    /// Decodes a PKCS#8 container, insisting on an RSA key.
    pub fn from_pkcs8_der(der: Vec<u8>) -> Result<Self, DecodeError> {
        let info = pkcs8::PrivateKeyInfo::try_from(der.as_slice())?;
        if info.algorithm.oid != RSA_ENCRYPTION {
            return Err(DecodeError::NotRsa(info.algorithm.oid));
        }
        let key = RsaPrivateKey::try_from(info).map_err(|e| DecodeError::Rsa(e.to_string()))?;
        Ok(Self { key, pkcs8: der })
    }

    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.key.size() * 8
    }

    /// PKCS#1 encoding of the public component.
    pub fn public_key_pkcs1(&self) -> Result<Vec<u8>, rsa::pkcs1::Error> {
        Ok(self.key.to_public_key().to_pkcs1_der()?.as_bytes().to_vec())
    }

    /// DER `SubjectPublicKeyInfo` of the public component.
    pub fn public_key_spki(&self) -> Result<Vec<u8>, pkcs8::spki::Error> {
        Ok(self.key.to_public_key().to_public_key_der()?.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for CaPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaPrivateKey")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// A CA certificate and the private key it was issued for.
#[derive(Debug)]
pub struct CertificateAuthority {
    certificate: CaCertificate,
    private_key: CaPrivateKey,
    origin: CaOrigin,
}

impl CertificateAuthority {
    pub(crate) fn new(
        certificate: CaCertificate,
        private_key: CaPrivateKey,
        origin: CaOrigin,
    ) -> Self {
        Self {
            certificate,
            private_key,
            origin,
        }
    }

    pub fn certificate(&self) -> &CaCertificate {
        &self.certificate
    }

    pub fn private_key(&self) -> &CaPrivateKey {
        &self.private_key
    }

    pub fn origin(&self) -> CaOrigin {
        self.origin
    }

    /// The certificate in the form rustls expects.
    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.certificate.der.clone()
    }

    /// The private key in the form rustls expects.
    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.private_key.pkcs8.clone()))
    }

    /// The certificate in PEM format, for trust-store installation.
    pub fn cert_pem(&self) -> String {
        let pem = pem::Pem::new("CERTIFICATE", self.certificate.der());
        pem::encode_config(
            &pem,
            pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
        )
    }

    /// An rcgen signing key for issuing leaf certificates with this CA.
    pub fn key_pair(&self) -> Result<KeyPair, rcgen::Error> {
        KeyPair::from_pkcs8_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(self.private_key.pkcs8_der()),
            &PKCS_RSA_SHA256,
        )
    }

    /// SHA-256 fingerprint of the certificate DER, lowercase hex.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.certificate.der()))
    }

    /// Whether the certificate's public key is the private key's public
    /// component.
    pub fn key_matches_certificate(&self) -> bool {
        self.private_key
            .public_key_pkcs1()
            .is_ok_and(|pk| pk == self.certificate.public_key)
    }
}
