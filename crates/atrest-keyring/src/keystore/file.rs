//! Filesystem keystore: wrapped DEK in an owner-read-only file, wrapped IV in
//! an optional sibling file.
//!
//! Writes go through a temporary file in the destination directory, get their
//! permissions clamped to 0400, then rename over the destination so readers
//! never observe a partial key file.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::KeyringError;
use crate::keystore::Keystore;

pub struct FileKeystore {
    key_path: PathBuf,
    iv_path: Option<PathBuf>,
}

impl FileKeystore {
    pub fn new(key_path: PathBuf, iv_path: Option<PathBuf>) -> Self {
        Self { key_path, iv_path }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn iv_path(&self) -> Option<&Path> {
        self.iv_path.as_deref()
    }
}

impl Keystore for FileKeystore {
    fn read(&self) -> Result<Vec<u8>, KeyringError> {
        check_permissions(&self.key_path)?;
        fs::read(&self.key_path).map_err(|e| {
            KeyringError::Keystore(format!(
                "cannot read key file {}: {e}",
                self.key_path.display()
            ))
        })
    }

    fn write(&mut self, wrapped: &[u8]) -> Result<(), KeyringError> {
        write_secure(&self.key_path, wrapped)
    }

    fn read_iv(&self) -> Result<Option<Vec<u8>>, KeyringError> {
        match &self.iv_path {
            Some(path) => fs::read(path).map(Some).map_err(|e| {
                KeyringError::Keystore(format!("cannot read iv file {}: {e}", path.display()))
            }),
            None => Ok(None),
        }
    }

    fn write_iv(&mut self, wrapped: &[u8]) -> Result<(), KeyringError> {
        let path = self.iv_path.as_ref().ok_or_else(|| {
            KeyringError::Keystore("file keystore has no iv_filename configured".into())
        })?;
        write_secure(path, wrapped)
    }
}

/// Reject key files readable by group or other.
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<(), KeyringError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| {
        KeyringError::Keystore(format!("cannot stat key file {}: {e}", path.display()))
    })?;
    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(KeyringError::InsecurePermissions {
            path: path.to_path_buf(),
            mode: mode & 0o777,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<(), KeyringError> {
    Ok(())
}

fn write_secure(path: &Path, data: &[u8]) -> Result<(), KeyringError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        KeyringError::Keystore(format!(
            "cannot create temporary file in {}: {e}",
            dir.display()
        ))
    })?;
    tmp.write_all(data)
        .map_err(|e| KeyringError::Keystore(format!("cannot write key material: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o400))
            .map_err(|e| {
                KeyringError::Keystore(format!(
                    "cannot set permissions on {}: {e}",
                    path.display()
                ))
            })?;
    }

    tmp.persist(path).map_err(|e| {
        KeyringError::Keystore(format!("cannot replace {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), "wrote wrapped key file");
    Ok(())
}
