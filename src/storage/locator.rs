//! Storage directory resolution.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Mode for the storage directory: owner-only access and traversal.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Resolves artifact file names to paths inside a stable storage directory.
///
/// When no directory could be determined the locator degrades to bare file
/// names, which resolve relative to the process working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocator {
    directory: Option<PathBuf>,
}

impl StorageLocator {
    /// Locator rooted at `<user config dir>/<namespace>`.
    pub fn user(namespace: &str) -> Self {
        let directory = dirs::config_dir().map(|dir| dir.join(namespace));
        if directory.is_none() {
            warn!("no user configuration directory, falling back to the working directory");
        }
        Self { directory }
    }

    /// Locator rooted at an explicit directory.
    pub fn at(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
        }
    }

    /// Locator that resolves against the process working directory.
    pub fn working_dir() -> Self {
        Self { directory: None }
    }

    /// Returns the storage directory, if one was determined.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Returns the path for `filename`, creating the storage directory first
    /// if it does not exist yet.
    pub fn resolve(&self, filename: &str) -> PathBuf {
        match &self.directory {
            Some(dir) => {
                ensure_dir(dir);
                dir.join(filename)
            }
            None => PathBuf::from(filename),
        }
    }
}

/// Creates `dir` with owner-only permissions. Failure is not fatal here:
/// the subsequent read reports the file as missing and the subsequent write
/// surfaces the real error.
fn ensure_dir(dir: &Path) {
    if dir.is_dir() {
        return;
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }

    match builder.create(dir) {
        Ok(()) => debug!("created storage directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => warn!("failed to create storage directory {}: {}", dir.display(), e),
    }
}
