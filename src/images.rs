//! Image store used for bank-transfer payment proofs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::{entities::order::ImageRef, errors::ServiceError};

const SUPPORTED_FORMATS: &[&str] = &["png", "jpg", "jpeg", "webp"];
const PROOF_DIR: &str = "payment-proofs";

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("Empty file provided")]
    Empty,
    #[error("File too large. Maximum size is {0} bytes")]
    TooLarge(usize),
    #[error("Unsupported file format '{0}'. Supported: png, jpg, jpeg, webp")]
    UnsupportedFormat(String),
    #[error("Unknown image '{0}'")]
    UnknownImage(String),
    #[error("image store io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImageStoreError> for ServiceError {
    fn from(err: ImageStoreError) -> Self {
        match err {
            ImageStoreError::Io(e) => ServiceError::InternalError(e.to_string()),
            other => ServiceError::ValidationError(other.to_string()),
        }
    }
}

/// Persists an uploaded image and returns a stable `{public_id, url}` pair.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, file_name: &str, data: Bytes) -> Result<ImageRef, ImageStoreError>;

    /// Removes a previously uploaded image. Missing images are not an error.
    async fn delete(&self, image: &ImageRef) -> Result<(), ImageStoreError>;
}

/// Writes images under a local directory. Each upload gets its own file, named
/// by a content-hash prefix and a random suffix, so deleting one never affects
/// another order's proof.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
    base_url: String,
    max_bytes: usize,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `image`. Only plain names under the proof directory are
    /// accepted.
    fn stored_path(&self, image: &ImageRef) -> Result<PathBuf, ImageStoreError> {
        let stem = image
            .public_id
            .strip_prefix(PROOF_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|stem| !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
            .ok_or_else(|| ImageStoreError::UnknownImage(image.public_id.clone()))?;
        let file_name = image
            .url
            .rsplit('/')
            .next()
            .filter(|name| {
                name.strip_prefix(stem)
                    .and_then(|rest| rest.strip_prefix('.'))
                    .is_some_and(|ext| SUPPORTED_FORMATS.contains(&ext))
            })
            .ok_or_else(|| ImageStoreError::UnknownImage(image.public_id.clone()))?;
        Ok(self.root.join(PROOF_DIR).join(file_name))
    }

    fn extension(file_name: &str) -> Result<String, ImageStoreError> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if SUPPORTED_FORMATS.contains(&ext.as_str()) {
            Ok(ext)
        } else {
            Err(ImageStoreError::UnsupportedFormat(ext))
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(&self, file_name: &str, data: Bytes) -> Result<ImageRef, ImageStoreError> {
        if data.is_empty() {
            return Err(ImageStoreError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(ImageStoreError::TooLarge(self.max_bytes));
        }
        let ext = Self::extension(file_name)?;

        let digest = hex::encode(Sha256::digest(&data));
        let stem = format!("{}-{}", &digest[..16], &Uuid::new_v4().simple().to_string()[..12]);
        let public_id = format!("{}/{}", PROOF_DIR, stem);
        let stored_name = format!("{}.{}", stem, ext);

        let dir = self.root.join(PROOF_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&stored_name);
        if let Err(e) = tokio::fs::write(&path, &data).await {
            error!(path = %path.display(), error = %e, "Failed to write uploaded image");
            return Err(e.into());
        }

        info!(public_id = %public_id, size = data.len(), "Stored payment proof image");
        Ok(ImageRef {
            url: format!("{}/{}/{}", self.base_url, PROOF_DIR, stored_name),
            public_id,
        })
    }

    async fn delete(&self, image: &ImageRef) -> Result<(), ImageStoreError> {
        let path = self.stored_path(image)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(public_id = %image.public_id, "Removed payment proof image");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
