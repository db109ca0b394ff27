use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use weir_core::error::{Result, WeirError};
use weir_core::node::ResourceId;
use weir_core::traits::{ByteStream, ResourceStore};

/// Directory-backed resource store.
///
/// Each resource is one blob file named by its identifier under the root
/// directory. Identifiers are allocated at upload time and never reused.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| WeirError::Store(format!("failed to create store root: {}", e)))?;
        Ok(Self { root })
    }

    fn blob_path(&self, id: &ResourceId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

impl ResourceStore for LocalStore {
    fn download_stream(&self, id: &ResourceId) -> BoxFuture<'_, Result<ByteStream>> {
        let path = self.blob_path(id);
        let id = id.clone();
        Box::pin(async move {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|_| WeirError::ResourceNotFound(id.to_string()))?;
            Ok(Box::new(file) as ByteStream)
        })
    }

    fn upload_stream(&self, mut stream: ByteStream) -> BoxFuture<'_, Result<ResourceId>> {
        Box::pin(async move {
            let id = ResourceId::fresh();
            let path = self.blob_path(&id);

            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(|e| WeirError::Store(format!("failed to create blob: {}", e)))?;
            let bytes = tokio::io::copy(&mut stream, &mut file)
                .await
                .map_err(|e| WeirError::Store(format!("failed to write blob: {}", e)))?;
            file.flush()
                .await
                .map_err(|e| WeirError::Store(format!("failed to flush blob: {}", e)))?;

            debug!(id = %id, bytes, "uploaded resource");
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        let payload = b"weir local store payload".to_vec();
        let id = store
            .upload_stream(Box::new(std::io::Cursor::new(payload.clone())))
            .await
            .unwrap();

        let mut stream = store.download_stream(&id).await.unwrap();
        let mut read_back = Vec::new();
        stream.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn test_download_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        let err = match store
            .download_stream(&ResourceId("no-such-blob".into()))
            .await
        {
            Ok(_) => panic!("expected download of missing resource to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, WeirError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_uploads_allocate_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        let a = store
            .upload_stream(Box::new(std::io::Cursor::new(b"same".to_vec())))
            .await
            .unwrap();
        let b = store
            .upload_stream(Box::new(std::io::Cursor::new(b"same".to_vec())))
            .await
            .unwrap();
        assert_ne!(a, b);
    }
}
