//! CA certificate management for TLS MitM.
//!
//! This module provides persistent root CA bootstrap: recover the CA from
//! disk, or generate and store a new one.

mod authority;
mod bootstrap;
mod generator;
mod serial;

pub use authority::{CaCertificate, CaOrigin, CaPrivateKey, CertificateAuthority, DecodeError};
pub use bootstrap::{CaBootstrapper, DEFAULT_CERT_FILE, DEFAULT_KEY_FILE, LoadOutcome};
pub use generator::{
    CaError, CaGenerator, CaIdentity, CaResult, DEFAULT_COMMON_NAME, DEFAULT_DNS_NAMES,
    DEFAULT_ORGANIZATION, RSA_KEY_BITS,
};
pub use serial::SerialAllocator;
