//! Self-signed CA generation using rsa and rcgen.

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyIdMethod, KeyPair, KeyUsagePurpose, PKCS_RSA_SHA256, SanType, SerialNumber,
};
use rsa::RsaPrivateKey;
use rustls::pki_types::PrivatePkcs8KeyDer;
use sha1::{Digest, Sha1};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::authority::{CaCertificate, CaOrigin, CaPrivateKey, CertificateAuthority};
use super::serial::SerialAllocator;

/// RSA modulus size for the CA key. Never lowered on failure.
pub const RSA_KEY_BITS: usize = 2048;

pub const DEFAULT_COMMON_NAME: &str = "MITM CA";
pub const DEFAULT_ORGANIZATION: &str = "mitm-ca";
pub const DEFAULT_DNS_NAMES: [&str; 2] = ["mitm-ca", "localhost"];

/// The result type for CA operations.
pub type CaResult<T> = Result<T, CaError>;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("failed to generate RSA key pair: {0}")]
    KeyGeneration(#[from] rsa::Error),
    #[error("failed to build certificate template: {0}")]
    Template(String),
    #[error("failed to sign certificate: {0}")]
    Signing(#[source] rcgen::Error),
    #[error("failed to serialize key: {0}")]
    KeySerialization(String),
    #[error("serial numbers exhausted")]
    SerialExhausted,
    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Subject identity of generated CA certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaIdentity {
    pub common_name: String,
    pub organization: String,
    /// DNS names identifying the CA itself.
    pub dns_names: Vec<String>,
}

impl Default for CaIdentity {
    fn default() -> Self {
        Self {
            common_name: DEFAULT_COMMON_NAME.to_string(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            dns_names: DEFAULT_DNS_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Mints fresh self-signed CA certificates.
///
/// Each certificate is valid from one year before to one year after the
/// moment of generation and draws its serial from the shared
/// [`SerialAllocator`].
#[derive(Debug)]
pub struct CaGenerator {
    identity: CaIdentity,
    serials: Arc<SerialAllocator>,
}

impl CaGenerator {
    pub fn new(identity: CaIdentity, serials: Arc<SerialAllocator>) -> Self {
        Self { identity, serials }
    }

    pub fn identity(&self) -> &CaIdentity {
        &self.identity
    }

    pub fn serials(&self) -> &Arc<SerialAllocator> {
        &self.serials
    }

    /// Generates a new RSA-2048 key pair and a self-signed CA certificate
    /// for it.
    pub fn generate(&self) -> CaResult<CertificateAuthority> {
        let serial = self.serials.next().ok_or(CaError::SerialExhausted)?;
        let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)?;
        let private_key =
            CaPrivateKey::from_rsa(rsa_key).map_err(|e| CaError::KeySerialization(e.to_string()))?;

        let key_id = subject_key_id(&private_key)?;
        let params = self.template(serial, key_id, OffsetDateTime::now_utc())?;

        let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(private_key.pkcs8_der()),
            &PKCS_RSA_SHA256,
        )
        .map_err(CaError::Signing)?;
        let cert = params.self_signed(&key_pair).map_err(CaError::Signing)?;

        // Parse back to make sure what we signed is well-formed.
        let certificate = CaCertificate::from_der(cert.der().to_vec())
            .map_err(|e| CaError::Template(e.to_string()))?;

        debug!("generated CA certificate with serial {}", serial);

        Ok(CertificateAuthority::new(
            certificate,
            private_key,
            CaOrigin::Generated,
        ))
    }

    fn template(
        &self,
        serial: u64,
        key_id: Vec<u8>,
        now: OffsetDateTime,
    ) -> CaResult<CertificateParams> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.identity.common_name.clone());
        dn.push(DnType::OrganizationName, self.identity.organization.clone());

        let mut params = CertificateParams::default();
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(serial));
        params.key_identifier_method = KeyIdMethod::PreSpecified(key_id);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = self
            .identity
            .dns_names
            .iter()
            .map(|name| {
                name.as_str()
                    .try_into()
                    .map(SanType::DnsName)
                    .map_err(|_| CaError::Template(format!("invalid DNS name: {}", name)))
            })
            .collect::<CaResult<Vec<_>>>()?;

        params.not_before = shift_years(now, -1)?;
        params.not_after = shift_years(now, 1)?;

        Ok(params)
    }
}

/// SHA-1 over the DER `SubjectPublicKeyInfo`, as in RFC 5280 4.2.1.2 (1).
fn subject_key_id(key: &CaPrivateKey) -> CaResult<Vec<u8>> {
    let spki = key
        .public_key_spki()
        .map_err(|e| CaError::Template(format!("failed to encode public key: {}", e)))?;
    Ok(Sha1::digest(&spki).to_vec())
}

/// Moves `at` by whole calendar years. Feb 29 lands on Mar 1 in non-leap
/// years.
fn shift_years(at: OffsetDateTime, years: i32) -> CaResult<OffsetDateTime> {
    let year = at.year() + years;
    at.replace_year(year)
        .or_else(|_| (at + Duration::days(1)).replace_year(year))
        .map_err(|e| CaError::Template(format!("validity window out of range: {}", e)))
}
