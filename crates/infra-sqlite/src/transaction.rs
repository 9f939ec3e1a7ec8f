// SQLite Transaction Implementation

use crate::error::map_sqlx_error;
use crate::job_repository::insert_record;
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction as SqlxTransaction};
use utagms_core::domain::{GroupNumber, JobRecord};
use utagms_core::error::Result;
use utagms_core::port::{JobRepositoryTransaction, Transaction};

/// Open transaction on the job store; dropping it without commit rolls back
pub struct SqliteJobTransaction<'a> {
    tx: SqlxTransaction<'a, Sqlite>,
}

impl<'a> SqliteJobTransaction<'a> {
    pub fn new(tx: SqlxTransaction<'a, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteJobTransaction<'_> {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl JobRepositoryTransaction for SqliteJobTransaction<'_> {
    async fn next_group(&mut self, project_id: &str) -> Result<GroupNumber> {
        // Writing first takes the write lock up front, so concurrent
        // submitters of one project serialize here
        sqlx::query_scalar(
            r#"
            INSERT INTO project_groups (project_id, latest_group) VALUES (?, 1)
            ON CONFLICT(project_id) DO UPDATE SET latest_group = latest_group + 1
            RETURNING latest_group
            "#,
        )
        .bind(project_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert(&mut self, job: &JobRecord) -> Result<()> {
        insert_record(&mut *self.tx, job).await
    }
}
