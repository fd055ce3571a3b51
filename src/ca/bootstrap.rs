//! Load-or-generate orchestration for the persisted CA.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::authority::{CaOrigin, CertificateAuthority};
use super::generator::{CaError, CaGenerator, CaResult};
use super::serial::SerialAllocator;
use crate::config::CaConfig;
use crate::storage::{ArtifactStore, LoadError, StorageLocator};

pub const DEFAULT_CERT_FILE: &str = "ca.der";
pub const DEFAULT_KEY_FILE: &str = "caKey.der";

/// Result of the load phase.
#[derive(Debug)]
pub enum LoadOutcome {
    /// Both artifacts were read back intact.
    Recovered(CertificateAuthority),
    /// Something was missing or wrong; a fresh CA has to be generated.
    /// Any load anomaly ends up here, not just a missing file.
    NeedGenerate(LoadError),
}

/// Produces the CA for this process: recovered from disk when possible,
/// otherwise freshly generated and persisted.
///
/// There is no locking between processes; two processes bootstrapping
/// against the same empty directory may both generate, and the last writer
/// wins.
#[derive(Debug)]
pub struct CaBootstrapper {
    locator: StorageLocator,
    store: ArtifactStore,
    generator: CaGenerator,
    cert_file: String,
    key_file: String,
    verify_key_binding: bool,
}

impl CaBootstrapper {
    /// Creates a bootstrapper using the default file names with key binding
    /// verification enabled.
    pub fn new(locator: StorageLocator, generator: CaGenerator) -> Self {
        Self {
            locator,
            store: ArtifactStore::new(),
            generator,
            cert_file: DEFAULT_CERT_FILE.to_string(),
            key_file: DEFAULT_KEY_FILE.to_string(),
            verify_key_binding: true,
        }
    }

    /// Creates a bootstrapper from configuration, drawing serials from
    /// `serials`.
    pub fn from_config(config: &CaConfig, serials: Arc<SerialAllocator>) -> Self {
        Self::new(
            config.locator(),
            CaGenerator::new(config.identity(), serials),
        )
        .with_file_names(&config.storage.cert_file, &config.storage.key_file)
        .with_key_binding_check(config.verify_key_binding)
    }

    /// Overrides the certificate and key file names inside the storage
    /// directory.
    pub fn with_file_names(mut self, cert_file: &str, key_file: &str) -> Self {
        self.cert_file = cert_file.to_string();
        self.key_file = key_file.to_string();
        self
    }

    /// Enables or disables the check that a recovered certificate belongs to
    /// the recovered private key.
    pub fn with_key_binding_check(mut self, enabled: bool) -> Self {
        self.verify_key_binding = enabled;
        self
    }

    /// Where the artifacts are stored.
    pub fn locator(&self) -> &StorageLocator {
        &self.locator
    }

    /// Path of the DER certificate, creating the storage directory if needed.
    pub fn cert_path(&self) -> PathBuf {
        self.locator.resolve(&self.cert_file)
    }

    /// Path of the PKCS#8 private key, creating the storage directory if
    /// needed.
    pub fn key_path(&self) -> PathBuf {
        self.locator.resolve(&self.key_file)
    }

    /// Returns a usable CA, recovering it from disk or generating and
    /// persisting a new one.
    ///
    /// Load problems never fail this call; generation and persistence
    /// problems always do. A CA that could not be written is not returned.
    pub fn bootstrap(&self) -> CaResult<CertificateAuthority> {
        match self.try_load() {
            LoadOutcome::Recovered(ca) => Ok(ca),
            LoadOutcome::NeedGenerate(_) => self.generate_and_persist(),
        }
    }

    /// Attempts to recover the CA from disk.
    pub fn try_load(&self) -> LoadOutcome {
        let cert_path = self.cert_path();
        let certificate = match self.store.read_certificate(&cert_path) {
            Ok(certificate) => certificate,
            Err(e) if e.is_not_found() => {
                debug!("no CA certificate at {}, generating", cert_path.display());
                return LoadOutcome::NeedGenerate(e);
            }
            Err(e) => {
                warn!("error reading CA certificate, regenerating: {}", e);
                return LoadOutcome::NeedGenerate(e);
            }
        };

        let key_path = self.key_path();
        let private_key = match self.store.read_private_key(&key_path) {
            Ok(key) => key,
            Err(e) => {
                warn!("error reading CA private key, regenerating: {}", e);
                return LoadOutcome::NeedGenerate(e);
            }
        };

        let ca = CertificateAuthority::new(certificate, private_key, CaOrigin::Recovered);
        if self.verify_key_binding && !ca.key_matches_certificate() {
            let e = LoadError::KeyMismatch {
                cert: cert_path,
                key: key_path,
            };
            warn!("{}, regenerating", e);
            return LoadOutcome::NeedGenerate(e);
        }

        info!(
            "recovered CA certificate (serial {}) from {}",
            hex::encode(ca.certificate().serial()),
            cert_path.display()
        );
        LoadOutcome::Recovered(ca)
    }

    fn generate_and_persist(&self) -> CaResult<CertificateAuthority> {
        let ca = self.generator.generate()?;

        let cert_path = self.cert_path();
        self.store
            .write_certificate(&cert_path, ca.certificate().der())
            .map_err(|source| CaError::Persist {
                path: cert_path.clone(),
                source,
            })?;

        let key_path = self.key_path();
        self.store
            .write_private_key(&key_path, ca.private_key().pkcs8_der())
            .map_err(|source| CaError::Persist {
                path: key_path.clone(),
                source,
            })?;

        info!(
            "generated CA certificate (serial {}) at {}",
            hex::encode(ca.certificate().serial()),
            cert_path.display()
        );
        Ok(ca)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CaIdentity;
    use std::fs;
    use std::path::Path;

    fn bootstrapper(dir: &Path) -> CaBootstrapper {
        CaBootstrapper::new(
            StorageLocator::at(dir),
            CaGenerator::new(CaIdentity::default(), Arc::new(SerialAllocator::new(1_000))),
        )
    }

    /// Bootstrapping into a directory that does not exist yet creates it,
    /// writes both artifacts and returns a valid self-signed CA.
    #[test]
    fn bootstrap_creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("config").join("mitm-ca");

        let ca = bootstrapper(&dir).bootstrap().unwrap();

        assert_eq!(ca.origin(), CaOrigin::Generated);
        assert!(dir.join(DEFAULT_CERT_FILE).is_file());
        assert!(dir.join(DEFAULT_KEY_FILE).is_file());
        assert!(ca.certificate().verify_self_signed());
        assert!(ca.key_matches_certificate());
        assert_eq!(
            fs::read(dir.join(DEFAULT_CERT_FILE)).unwrap(),
            ca.certificate().der()
        );
        assert_eq!(
            fs::read(dir.join(DEFAULT_KEY_FILE)).unwrap(),
            ca.private_key().pkcs8_der()
        );
    }

    /// A second bootstrap over populated storage returns the same
    /// certificate without regenerating.
    #[test]
    fn bootstrap_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = bootstrapper(tmp.path());

        let first = bootstrapper.bootstrap().unwrap();
        let second = bootstrapper.bootstrap().unwrap();

        assert_eq!(second.origin(), CaOrigin::Recovered);
        assert_eq!(first.certificate(), second.certificate());
        assert_eq!(first.certificate().serial(), second.certificate().serial());
        assert_eq!(
            first.certificate().not_before(),
            second.certificate().not_before()
        );
        assert_eq!(
            first.private_key().pkcs8_der(),
            second.private_key().pkcs8_der()
        );
        // Only one serial was consumed.
        assert_eq!(bootstrapper.generator.serials().current(), 1_001);
    }

    /// Recovery works across independent bootstrapper instances, as after a
    /// process restart.
    #[test]
    fn bootstrap_recovers_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let first = bootstrapper(tmp.path()).bootstrap().unwrap();
        let second = bootstrapper(tmp.path()).bootstrap().unwrap();

        assert_eq!(second.origin(), CaOrigin::Recovered);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    /// Deleting the key while the certificate survives yields a brand new
    /// CA with both files rewritten.
    #[test]
    fn missing_key_regenerates() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = bootstrapper(tmp.path());
        let original = bootstrapper.bootstrap().unwrap();

        fs::remove_file(bootstrapper.key_path()).unwrap();
        assert!(matches!(
            bootstrapper.try_load(),
            LoadOutcome::NeedGenerate(LoadError::NotFound { .. })
        ));

        let regenerated = bootstrapper.bootstrap().unwrap();
        assert_eq!(regenerated.origin(), CaOrigin::Generated);
        assert_ne!(
            original.certificate().serial(),
            regenerated.certificate().serial()
        );
        assert_eq!(
            fs::read(bootstrapper.cert_path()).unwrap(),
            regenerated.certificate().der()
        );
        assert_eq!(
            fs::read(bootstrapper.key_path()).unwrap(),
            regenerated.private_key().pkcs8_der()
        );
    }

    #[test]
    fn corrupt_key_regenerates() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = bootstrapper(tmp.path());
        let original = bootstrapper.bootstrap().unwrap();

        fs::write(bootstrapper.key_path(), b"garbage").unwrap();
        assert!(matches!(
            bootstrapper.try_load(),
            LoadOutcome::NeedGenerate(LoadError::Parse { .. })
        ));

        let regenerated = bootstrapper.bootstrap().unwrap();
        assert_eq!(regenerated.origin(), CaOrigin::Generated);
        assert_ne!(original.fingerprint(), regenerated.fingerprint());
        assert!(regenerated.key_matches_certificate());
    }

    #[test]
    fn corrupt_certificate_regenerates() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = bootstrapper(tmp.path());
        bootstrapper.bootstrap().unwrap();

        fs::write(bootstrapper.cert_path(), b"garbage").unwrap();

        let regenerated = bootstrapper.bootstrap().unwrap();
        assert_eq!(regenerated.origin(), CaOrigin::Generated);
        assert_eq!(
            fs::read(bootstrapper.cert_path()).unwrap(),
            regenerated.certificate().der()
        );
    }

    /// A non-RSA key next to a valid certificate is regenerated.
    #[test]
    fn wrong_key_type_regenerates() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = bootstrapper(tmp.path());
        bootstrapper.bootstrap().unwrap();

        let ec = rcgen::KeyPair::generate().unwrap();
        fs::write(bootstrapper.key_path(), ec.serialize_der()).unwrap();
        assert!(matches!(
            bootstrapper.try_load(),
            LoadOutcome::NeedGenerate(LoadError::WrongKeyType { .. })
        ));

        let regenerated = bootstrapper.bootstrap().unwrap();
        assert_eq!(regenerated.origin(), CaOrigin::Generated);
    }

    /// A key from a different CA is caught by the binding check, or
    /// accepted as-is when the check is disabled.
    #[test]
    fn mismatched_key_handling() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        bootstrapper(&a).bootstrap().unwrap();
        bootstrapper(&b).bootstrap().unwrap();
        fs::copy(b.join(DEFAULT_KEY_FILE), a.join(DEFAULT_KEY_FILE)).unwrap();

        let lenient = bootstrapper(&a).with_key_binding_check(false);
        match lenient.try_load() {
            LoadOutcome::Recovered(ca) => assert!(!ca.key_matches_certificate()),
            LoadOutcome::NeedGenerate(e) => panic!("expected recovery, got {}", e),
        }

        let strict = bootstrapper(&a);
        assert!(matches!(
            strict.try_load(),
            LoadOutcome::NeedGenerate(LoadError::KeyMismatch { .. })
        ));
        let regenerated = strict.bootstrap().unwrap();
        assert_eq!(regenerated.origin(), CaOrigin::Generated);
        assert!(regenerated.key_matches_certificate());
    }

    /// Custom file names from configuration are honored.
    #[test]
    fn custom_file_names() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = bootstrapper(tmp.path()).with_file_names("root.der", "root-key.der");

        bootstrapper.bootstrap().unwrap();

        assert_eq!(bootstrapper.locator().directory(), Some(tmp.path()));
        assert!(tmp.path().join("root.der").is_file());
        assert!(tmp.path().join("root-key.der").is_file());
        assert!(!tmp.path().join(DEFAULT_CERT_FILE).exists());
    }

    /// When the CA cannot be written the call fails instead of returning an
    /// unpersisted CA.
    #[test]
    fn persist_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory squatting on the certificate path makes the write fail.
        fs::create_dir(tmp.path().join(DEFAULT_CERT_FILE)).unwrap();

        let err = bootstrapper(tmp.path()).bootstrap().unwrap_err();
        match err {
            CaError::Persist { path, .. } => assert!(path.ends_with(DEFAULT_CERT_FILE)),
            other => panic!("expected persist failure, got {}", other),
        }
    }
}
