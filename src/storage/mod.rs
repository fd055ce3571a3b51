//! On-disk persistence of the CA artifacts.
//!
//! This module resolves the per-user storage directory and reads/writes the
//! DER-encoded certificate and PKCS#8 private key with owner-only permissions.

mod artifacts;
mod locator;

pub use artifacts::{ArtifactStore, LoadError};
pub use locator::StorageLocator;
