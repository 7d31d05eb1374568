use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use meteopin_embedded::storage::LocalStorage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("storage directory {0} is not mounted")]
    Unmounted(PathBuf),
    #[error("invalid key {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// One plain-text file per key under a directory, the host stand-in for the
/// device's flash filesystem.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    mounted: bool,
}

impl FileStorage {
    /// Creates the directory if needed. A directory that cannot be created
    /// leaves the storage unmounted.
    pub fn open(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let mounted = match fs::create_dir_all(&root) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to mount storage at {}: {}", root.display(), e);
                false
            }
        };

        Self { root, mounted }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, FileStorageError> {
        if !self.mounted {
            return Err(FileStorageError::Unmounted(self.root.clone()));
        }
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(FileStorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl LocalStorage for FileStorage {
    type Error = FileStorageError;

    fn is_mounted(&self) -> bool {
        self.mounted && self.root.is_dir()
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        let path = self.path(key)?;
        let partial = path.with_extension("part");

        let mut file = fs::File::create(&partial)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&partial, &path)?;
        Ok(())
    }

    async fn remove_item(&mut self, key: &str) -> Result<(), Self::Error> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
