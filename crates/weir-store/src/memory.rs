use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::io::AsyncReadExt;

use weir_core::error::{Result, WeirError};
use weir_core::node::ResourceId;
use weir_core::traits::{ByteStream, ResourceStore};

/// In-memory resource store, used as the test double for the engine.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob directly, bypassing the stream contract. Test helper.
    pub fn insert(&self, bytes: impl Into<Vec<u8>>) -> ResourceId {
        let id = ResourceId::fresh();
        self.blobs
            .lock()
            .expect("memory store lock poisoned")
            .insert(id.as_str().to_string(), bytes.into());
        id
    }

    /// Read a blob back by id. Test helper.
    pub fn get(&self, id: &ResourceId) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .expect("memory store lock poisoned")
            .get(id.as_str())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("memory store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceStore for MemoryStore {
    fn download_stream(&self, id: &ResourceId) -> BoxFuture<'_, Result<ByteStream>> {
        let bytes = self.get(id);
        let id = id.clone();
        Box::pin(async move {
            let bytes = bytes.ok_or_else(|| WeirError::ResourceNotFound(id.to_string()))?;
            Ok(Box::new(std::io::Cursor::new(bytes)) as ByteStream)
        })
    }

    fn upload_stream(&self, mut stream: ByteStream) -> BoxFuture<'_, Result<ResourceId>> {
        Box::pin(async move {
            let mut bytes = Vec::new();
            stream
                .read_to_end(&mut bytes)
                .await
                .map_err(|e| WeirError::Store(format!("failed to read upload stream: {}", e)))?;
            Ok(self.insert(bytes))
        })
    }
}
