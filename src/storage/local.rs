use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::BlobStore;

/// Local file system blob store: one file per blob, named by its id, under a flat root
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn get_full_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.base_path.join(id))
    }
}

/// Blob ids are lowercase hex tokens; anything else could escape the root.
fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
        return Err(AppError::BadRequest(format!("Invalid blob id: {:?}", id)));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn put(&self, id: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(id)?;
        fs::create_dir_all(&self.base_path).await?;

        // Write to a temporary sibling, then rename into place
        let temp_path = self
            .base_path
            .join(format!(".{}.{}.tmp", id, Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &full_path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp blob {:?}: {}", temp_path, cleanup);
                }
            }
            return Err(AppError::Io(e));
        }

        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(id)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::BlobNotFound(id.to_string())
            } else {
                AppError::Io(e)
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let full_path = self.get_full_path(id)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob {:?}", full_path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let full_path = self.get_full_path(id)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}
