use std::fs;
use std::path::{Path, PathBuf};

use super::identity::assign_identity;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to create upload folder {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: usize, limit: usize },
}

/// Copy of an upload persisted under its assigned name.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub name: String,
    pub path: PathBuf,
}

/// Local directory that keeps every uploaded image under its identity.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_file_size: usize,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: usize) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    pub fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::CreateDir {
            path: self.root.clone(),
            source,
        })
    }

    pub fn validate_image_size(&self, image_data: &[u8]) -> Result<(), StorageError> {
        if image_data.len() > self.max_file_size {
            return Err(StorageError::FileTooLarge {
                size: image_data.len(),
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Assigns a fresh identity to `original_name` and writes `image_data`
    /// under it, creating the folder if it has gone missing.
    pub fn store(
        &self,
        original_name: &str,
        image_data: &[u8],
    ) -> Result<StoredImage, StorageError> {
        self.validate_image_size(image_data)?;
        self.ensure_root()?;

        let name = assign_identity(original_name);
        let path = self.root.join(&name);
        fs::write(&path, image_data).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;

        log::debug!("Stored upload '{}' as {}", original_name, path.display());
        Ok(StoredImage { name, path })
    }
}
