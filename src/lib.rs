//! Persistent root CA for TLS interception.
//!
//! A TLS-intercepting proxy needs a CA certificate and private key to sign
//! per-host leaf certificates, and that CA has to survive restarts so that a
//! trust-store installation stays valid. This crate provides exactly that.
//!
//! # Architecture
//!
//! The bootstrapper:
//! 1. Resolves `ca.der` and `caKey.der` inside a per-user configuration
//!    directory, creating the directory (mode 0700) on first use
//! 2. Reads the DER certificate, then the PKCS#8 RSA private key
//! 3. Returns the pair unchanged if both load (and belong together)
//! 4. Otherwise generates a fresh RSA-2048 self-signed CA, writes both files
//!    (mode 0600) and returns it
//!
//! Any load anomaly (missing, unreadable, corrupt, wrong key type) leads to
//! regeneration. Generation and persistence errors are returned to the
//! caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mitm_ca::{CaBootstrapper, CaConfig, SerialAllocator};
//!
//! let config = CaConfig::default();
//! let serials = Arc::new(SerialAllocator::from_clock());
//! let ca = CaBootstrapper::from_config(&config, serials).bootstrap().unwrap();
//! println!("{}", ca.cert_pem());
//! ```

pub mod ca;
mod config;
pub mod storage;

pub use ca::{
    CaBootstrapper, CaCertificate, CaError, CaGenerator, CaIdentity, CaOrigin, CaPrivateKey,
    CaResult, CertificateAuthority, LoadOutcome, SerialAllocator,
};
pub use config::{CaConfig, ConfigError, StorageConfig, SubjectConfig};
pub use storage::{ArtifactStore, LoadError, StorageLocator};
