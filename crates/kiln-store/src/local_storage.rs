//! Filesystem introspection and the persisted storage-paths config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// The persisted list of storage paths a node re-opens on startup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Roots of the open storage paths.
    pub storage_paths: Vec<PathBuf>,
}

impl StorageConfig {
    /// Whether the config already lists the given path.
    pub fn has(&self, path: &Path) -> bool {
        self.storage_paths.iter().any(|p| p == path)
    }
}

/// Introspection of a single filesystem path and access to the persisted
/// storage config.
pub trait LocalStorage: Send + Sync {
    /// Capacity/usage snapshot of the filesystem holding `path`.
    fn get_stat(&self, path: &Path) -> Result<kiln_types::FsStat, StoreError>;

    /// Bytes used by the file or directory at `path`.
    ///
    /// A missing path is reported as `Ok(None)`.
    fn get_disk_usage(&self, path: &Path) -> Result<Option<u64>, StoreError>;

    /// Read the storage-paths config; `None` if none was persisted yet.
    fn get_storage_config(&self) -> Result<Option<StorageConfig>, StoreError>;

    /// Mutate and persist the storage-paths config.
    fn update_storage_config(
        &self,
        update: &dyn Fn(&mut StorageConfig),
    ) -> Result<(), StoreError>;
}

/// [`LocalStorage`] over the real filesystem, with a JSON config file.
pub struct FsLocalStorage {
    config_path: PathBuf,
}

impl FsLocalStorage {
    /// Create a storage introspector persisting its config at the given
    /// file path.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }
}

impl LocalStorage for FsLocalStorage {
    fn get_stat(&self, path: &Path) -> Result<kiln_types::FsStat, StoreError> {
        statvfs(path)
    }

    fn get_disk_usage(&self, path: &Path) -> Result<Option<u64>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(dir_size(path)?))
    }

    fn get_storage_config(&self) -> Result<Option<StorageConfig>, StoreError> {
        match std::fs::read_to_string(&self.config_path) {
            Ok(text) => {
                let config = serde_json::from_str(&text)
                    .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn update_storage_config(
        &self,
        update: &dyn Fn(&mut StorageConfig),
    ) -> Result<(), StoreError> {
        let mut config = self.get_storage_config()?.unwrap_or_default();
        update(&mut config);

        // Atomic write: temp file in the same directory, then rename.
        let text = serde_json::to_string_pretty(&config)
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        let tmp = self.config_path.with_extension("tmp");
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.config_path)?;
        debug!(path = %self.config_path.display(), "storage config updated");
        Ok(())
    }
}

/// Recursive on-disk size of a file or directory.
fn dir_size(path: &Path) -> Result<u64, StoreError> {
    let meta = std::fs::metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        total += dir_size(&entry.path())?;
    }
    Ok(total)
}

/// Get filesystem capacity information using `libc::statvfs`.
#[cfg(unix)]
fn statvfs(path: &Path) -> Result<kiln_types::FsStat, StoreError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is a valid null-terminated C string. `stat` is
    // zero-initialized and used as an out-parameter; the call only writes
    // to `stat` and reads `c_path`, both valid for its duration.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(StoreError::Io(std::io::Error::last_os_error()));
        }

        let block_size = stat.f_frsize as u64;
        Ok(kiln_types::FsStat {
            capacity: stat.f_blocks as u64 * block_size,
            // f_bavail is what unprivileged users can use; f_bfree would
            // include blocks reserved for root.
            available: stat.f_bavail as u64 * block_size,
            reserved: 0,
        })
    }
}

#[cfg(not(unix))]
fn statvfs(_path: &Path) -> Result<kiln_types::FsStat, StoreError> {
    // Fallback for non-Unix platforms: report unknown capacity.
    Ok(kiln_types::FsStat::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stat_reports_capacity() {
        let dir = TempDir::new().unwrap();
        let storage = FsLocalStorage::new(dir.path().join("storage.json"));
        let stat = storage.get_stat(dir.path()).unwrap();
        assert!(stat.capacity > 0);
        assert!(stat.available > 0);
        assert_eq!(stat.reserved, 0);
    }

    #[test]
    fn test_disk_usage_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = FsLocalStorage::new(dir.path().join("storage.json"));
        assert_eq!(
            storage.get_disk_usage(&dir.path().join("missing")).unwrap(),
            None
        );
    }

    #[test]
    fn test_disk_usage_sums_directory() {
        let dir = TempDir::new().unwrap();
        let storage = FsLocalStorage::new(dir.path().join("storage.json"));
        let sub = dir.path().join("cache");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a"), vec![0u8; 100]).unwrap();
        std::fs::write(sub.join("b"), vec![0u8; 50]).unwrap();
        assert_eq!(storage.get_disk_usage(&sub).unwrap(), Some(150));
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FsLocalStorage::new(dir.path().join("storage.json"));

        assert!(storage.get_storage_config().unwrap().is_none());

        storage
            .update_storage_config(&|c| c.storage_paths.push("/data/seal".into()))
            .unwrap();
        let config = storage.get_storage_config().unwrap().unwrap();
        assert!(config.has(Path::new("/data/seal")));
        assert!(!config.has(Path::new("/data/other")));
    }
}
