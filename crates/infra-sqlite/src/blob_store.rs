// SQLite Blob Store

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use utagms_core::domain::BlobRef;
use utagms_core::error::{AppError, Result};
use utagms_core::port::{BlobStore, TimeProvider};

/// Write-once payload storage keyed by random ids
pub struct SqliteBlobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteBlobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put(&self, content: &[u8]) -> Result<BlobRef> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO blobs (id, content, size_bytes, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(content)
            .bind(content.len() as i64)
            .bind(self.time_provider.now_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(BlobRef::new(id))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        let content: Option<Vec<u8>> = sqlx::query_scalar("SELECT content FROM blobs WHERE id = ?")
            .bind(blob.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        content.ok_or_else(|| AppError::NotFound(format!("Blob {} not found", blob.as_str())))
    }

    async fn delete(&self, blob: &BlobRef) -> Result<()> {
        sqlx::query("DELETE FROM blobs WHERE id = ?")
            .bind(blob.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
