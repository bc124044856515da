//! Single-writer guard for a model artifact path

use stance_core::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `<artifact>.lock`, held for the lifetime of a training run
#[derive(Debug)]
pub struct ArtifactLock {
    path: PathBuf,
}

impl ArtifactLock {
    /// Take the lock for `artifact`, failing if another run holds it
    pub fn acquire(artifact: &Path) -> Result<Self> {
        let path = lock_path(artifact);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::artifact(format!(
                    "{} is locked by another training run ({})",
                    artifact.display(),
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let lock = Self { path };
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %lock.path.display(), "Acquired artifact lock");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release artifact lock");
        }
    }
}

/// Lock file path for an artifact
pub fn lock_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    artifact.with_file_name(name)
}
