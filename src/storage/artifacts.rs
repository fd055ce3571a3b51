//! Reading and writing the persisted certificate and private key.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::ca::{CaCertificate, CaPrivateKey, DecodeError};

/// Mode for persisted artifacts: owner read/write only.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Why persisted CA material could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{} does not exist", .path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("{} does not hold an RSA key: {source}", .path.display())]
    WrongKeyType {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error("certificate {} was not issued for private key {}", .cert.display(), .key.display())]
    KeyMismatch { cert: PathBuf, key: PathBuf },
}

impl LoadError {
    /// Whether the artifact was simply absent (the first-run case).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Binary CA artifact storage: DER certificate, PKCS#8 DER private key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactStore;

impl ArtifactStore {
    pub fn new() -> Self {
        Self
    }

    /// Reads and parses a DER-encoded X.509 certificate.
    pub fn read_certificate(&self, path: &Path) -> Result<CaCertificate, LoadError> {
        let bytes = read_artifact(path)?;
        CaCertificate::from_der(bytes).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads and decodes a PKCS#8 DER private key. Anything but an RSA key
    /// is reported as [`LoadError::WrongKeyType`].
    pub fn read_private_key(&self, path: &Path) -> Result<CaPrivateKey, LoadError> {
        let bytes = read_artifact(path)?;
        CaPrivateKey::from_pkcs8_der(bytes).map_err(|source| match source {
            DecodeError::NotRsa(_) => LoadError::WrongKeyType {
                path: path.to_path_buf(),
                source,
            },
            source => LoadError::Parse {
                path: path.to_path_buf(),
                source,
            },
        })
    }

    /// Writes certificate bytes, replacing any existing file.
    pub fn write_certificate(&self, path: &Path, der: &[u8]) -> io::Result<()> {
        write_restricted(path, der)
    }

    /// Writes private key bytes, replacing any existing file.
    pub fn write_private_key(&self, path: &Path, pkcs8_der: &[u8]) -> io::Result<()> {
        write_restricted(path, pkcs8_der)
    }
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            LoadError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            LoadError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn write_restricted(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(FILE_MODE);
    }

    let mut file = opts.open(path)?;

    // The mode above only applies to newly created files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(FILE_MODE))?;
    }

    file.write_all(contents)?;
    file.sync_all()
}
