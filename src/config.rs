use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ca::{
    CaIdentity, DEFAULT_CERT_FILE, DEFAULT_COMMON_NAME, DEFAULT_DNS_NAMES, DEFAULT_KEY_FILE,
    DEFAULT_ORGANIZATION,
};
use crate::storage::StorageLocator;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where the CA artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Application segment appended to the user configuration directory.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Explicit storage directory. Overrides the user directory lookup.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// File name of the DER-encoded CA certificate.
    #[serde(default = "default_cert_file")]
    pub cert_file: String,
    /// File name of the PKCS#8 DER-encoded CA private key.
    #[serde(default = "default_key_file")]
    pub key_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            directory: None,
            cert_file: default_cert_file(),
            key_file: default_key_file(),
        }
    }
}

/// Identity written into freshly generated CA certificates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    #[serde(default = "default_common_name")]
    pub common_name: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    /// DNS names identifying the CA itself. Not used for leaf host matching.
    #[serde(default = "default_dns_names")]
    pub dns_names: Vec<String>,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            common_name: default_common_name(),
            organization: default_organization(),
            dns_names: default_dns_names(),
        }
    }
}

/// CA bootstrap configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    /// Config version for future compatibility.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub subject: SubjectConfig,

    /// Reject a recovered certificate whose public key does not belong to
    /// the recovered private key, and regenerate instead.
    #[serde(default = "default_verify_key_binding")]
    pub verify_key_binding: bool,
}

fn default_version() -> u32 {
    1
}

fn default_namespace() -> String {
    "mitm-ca".to_string()
}

fn default_cert_file() -> String {
    DEFAULT_CERT_FILE.to_string()
}

fn default_key_file() -> String {
    DEFAULT_KEY_FILE.to_string()
}

fn default_common_name() -> String {
    DEFAULT_COMMON_NAME.to_string()
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

fn default_dns_names() -> Vec<String> {
    DEFAULT_DNS_NAMES.iter().map(|n| n.to_string()).collect()
}

fn default_verify_key_binding() -> bool {
    true
}

impl CaConfig {
    /// Loads config from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses config from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Storage locator described by this config.
    ///
    /// An explicit `storage.directory` wins; otherwise the per-user
    /// configuration directory is used.
    pub fn locator(&self) -> StorageLocator {
        match &self.storage.directory {
            Some(dir) => StorageLocator::at(dir),
            None => StorageLocator::user(&self.storage.namespace),
        }
    }

    /// Subject identity for generated certificates.
    pub fn identity(&self) -> CaIdentity {
        CaIdentity {
            common_name: self.subject.common_name.clone(),
            organization: self.subject.organization.clone(),
            dns_names: self.subject.dns_names.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("empty storage namespace".to_string()));
        }

        for name in [&self.storage.cert_file, &self.storage.key_file] {
            if name.is_empty() {
                return Err(ConfigError::Invalid("empty file name".to_string()));
            }
            if name.contains('/') || name.contains('\\') {
                return Err(ConfigError::Invalid(format!(
                    "file name must not contain a path separator: {}",
                    name
                )));
            }
        }
        if self.storage.cert_file == self.storage.key_file {
            return Err(ConfigError::Invalid(
                "certificate and key must use different files".to_string(),
            ));
        }

        if self.subject.common_name.trim().is_empty() {
            return Err(ConfigError::Invalid("empty common name".to_string()));
        }

        // Must also survive the IA5String conversion used for the SAN extension.
        for name in &self.subject.dns_names {
            if name.is_empty()
                || name.chars().any(|c| c.is_whitespace())
                || rcgen::string::Ia5String::try_from(name.as_str()).is_err()
            {
                return Err(ConfigError::Invalid(format!("invalid DNS name: {:?}", name)));
            }
        }

        Ok(())
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage: StorageConfig::default(),
            subject: SubjectConfig::default(),
            verify_key_binding: default_verify_key_binding(),
        }
    }
}
