// SQLite Task Queue
//
// A message is owned by at most one receipt at a time. Receiving moves its
// visible_at forward; a consumer that never acks loses it once that passes.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use utagms_core::domain::{BlobRef, Delivery, DeliveryReceipt, TaskDescriptor};
use utagms_core::error::Result;
use utagms_core::port::{TaskQueue, TimeProvider};

pub struct SqliteTaskQueue {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    fn visible_after(&self, visibility: Duration) -> i64 {
        self.time_provider.now_millis() + visibility.as_millis() as i64
    }
}

#[derive(sqlx::FromRow)]
struct DeliveredRow {
    job_id: String,
    input_ref: String,
    enqueued_at: i64,
    delivery_count: i64,
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn publish(&self, task: &TaskDescriptor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_messages (job_id, input_ref, enqueued_at, visible_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&task.job_id)
        .bind(task.input_ref.as_str())
        .bind(task.enqueued_at)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(job_id = %task.job_id, "Task published");
        Ok(())
    }

    async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>> {
        let now = self.time_provider.now_millis();
        let receipt = uuid::Uuid::new_v4().to_string();

        // Single statement: select and claim happen under one write lock
        let row: Option<DeliveredRow> = sqlx::query_as(
            r#"
            UPDATE task_messages
            SET visible_at = ?, receipt = ?, delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM task_messages
                WHERE acked_at IS NULL AND visible_at <= ?
                ORDER BY visible_at ASC, id ASC
                LIMIT 1
            )
            RETURNING job_id, input_ref, enqueued_at, delivery_count
            "#,
        )
        .bind(self.visible_after(visibility))
        .bind(&receipt)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| Delivery {
            descriptor: TaskDescriptor {
                job_id: row.job_id,
                input_ref: BlobRef::new(row.input_ref),
                enqueued_at: row.enqueued_at,
            },
            receipt: DeliveryReceipt::new(receipt),
            delivery_count: row.delivery_count.max(0) as u32,
        }))
    }

    async fn ack(&self, receipt: &DeliveryReceipt) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE task_messages SET acked_at = ? WHERE receipt = ? AND acked_at IS NULL",
        )
        .bind(self.time_provider.now_millis())
        .bind(receipt.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn extend(&self, receipt: &DeliveryReceipt, visibility: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE task_messages SET visible_at = ? WHERE receipt = ? AND acked_at IS NULL",
        )
        .bind(self.visible_after(visibility))
        .bind(receipt.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, receipt: &DeliveryReceipt) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task_messages SET visible_at = ?, receipt = NULL
            WHERE receipt = ? AND acked_at IS NULL
            "#,
        )
        .bind(self.time_provider.now_millis())
        .bind(receipt.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn outstanding(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM task_messages WHERE acked_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn has_outstanding(&self, job_id: &str) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM task_messages WHERE job_id = ? AND acked_at IS NULL)",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }
}
