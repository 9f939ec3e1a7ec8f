// Blob Store Port - get/put-by-reference for problem payloads and outcomes

use crate::domain::BlobRef;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store content, returning a fresh reference
    async fn put(&self, content: &[u8]) -> Result<BlobRef>;

    /// Fetch content by reference
    ///
    /// # Errors
    /// - AppError::NotFound if the reference is unknown
    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>>;

    /// Remove a blob; unknown references are ignored
    async fn delete(&self, blob: &BlobRef) -> Result<()>;
}

/// Serialize `value` as JSON and store it
pub async fn put_json<T: Serialize + Sync>(store: &dyn BlobStore, value: &T) -> Result<BlobRef> {
    let bytes = serde_json::to_vec(value)?;
    store.put(&bytes).await
}

/// Fetch a blob and decode it as JSON
///
/// A blob that does not decode is reported as `AppError::Serialization`,
/// which is not an infrastructure fault: retrying will not fix it.
pub async fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, blob: &BlobRef) -> Result<T> {
    let bytes = store.get(blob).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct InMemoryBlobStore {
        blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        unavailable: Arc<AtomicBool>,
    }

    impl InMemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Storage("blob store unreachable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BlobStore for InMemoryBlobStore {
        async fn put(&self, content: &[u8]) -> Result<BlobRef> {
            self.check()?;
            let key = uuid::Uuid::new_v4().to_string();
            self.blobs
                .lock()
                .unwrap()
                .insert(key.clone(), content.to_vec());
            Ok(BlobRef::new(key))
        }

        async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>> {
            self.check()?;
            self.blobs
                .lock()
                .unwrap()
                .get(blob.as_str())
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Blob {} not found", blob)))
        }

        async fn delete(&self, blob: &BlobRef) -> Result<()> {
            self.check()?;
            self.blobs.lock().unwrap().remove(blob.as_str());
            Ok(())
        }
    }
}
