use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use tracing::{debug, error};

/// 50 MB upload limit for attachments
pub const MAX_BLOB_SIZE: usize = 50 * 1024 * 1024;

/// Public blob storage on local disk: `<root>/<bucket>/<file>`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    public_base: String,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_url(&self, bucket: &str, file_name: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.public_base, bucket, file_name)
    }

    pub async fn put(&self, bucket: &str, file_name: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            bail!("Empty upload");
        }
        if bytes.len() > MAX_BLOB_SIZE {
            bail!("Upload of {} bytes exceeds the {} byte limit", bytes.len(), MAX_BLOB_SIZE);
        }

        let path = self.path(bucket, file_name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                error!("Failed to create bucket directory {}: {}", dir.display(), e);
                anyhow!(e)
            })?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("Failed to write blob {}: {}", path.display(), e);
            anyhow!(e)
        })?;

        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    pub async fn get(&self, bucket: &str, file_name: &str) -> Result<Vec<u8>> {
        let path = self.path(bucket, file_name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    /// Removing a blob that is already gone succeeds.
    pub async fn remove(&self, bucket: &str, file_name: &str) -> Result<()> {
        let path = self.path(bucket, file_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Blob {} already removed", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    // Names come from clients; refuse anything that could leave the root.
    fn path(&self, bucket: &str, file_name: &str) -> Result<PathBuf> {
        for part in [bucket, file_name] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                bail!("Invalid storage path segment: {:?}", part);
            }
        }
        Ok(self.root.join(bucket).join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), "http://localhost:3000/");

        store.put("chat_images", "1_abc.png", b"png bytes").await.unwrap();
        assert_eq!(store.get("chat_images", "1_abc.png").await.unwrap(), b"png bytes");

        store.remove("chat_images", "1_abc.png").await.unwrap();
        store.remove("chat_images", "1_abc.png").await.unwrap();
        assert!(store.get("chat_images", "1_abc.png").await.is_err());
    }

    #[tokio::test]
    async fn rejects_traversal_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), "http://localhost:3000");
        assert!(store.put("..", "x", b"1").await.is_err());
        assert!(store.put("chat_files", "../x", b"1").await.is_err());
        assert!(store.put("chat_files", "x", b"").await.is_err());
    }

    #[test]
    fn public_url_shape() {
        let store = BlobStore::new("/tmp/blobs", "https://chat.example/");
        assert_eq!(
            store.public_url("chat_pdfs", "1_a.pdf"),
            "https://chat.example/storage/v1/object/public/chat_pdfs/1_a.pdf"
        );
    }
}
