// SQLite Job Record Store

use crate::error::map_sqlx_error;
use crate::SqliteJobTransaction;
use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool};
use utagms_core::domain::{BlobRef, GroupNumber, JobError, JobId, JobRecord, JobStatus};
use utagms_core::error::{AppError, Result};
use utagms_core::port::{JobRepository, JobRepositoryTransaction, TransactionalJobRepository};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_all(&self, sql: &str, binds: &[i64]) -> Result<Vec<JobRecord>> {
        let mut query = sqlx::query_as::<_, JobRow>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        rows.into_iter().map(JobRow::into_record).collect()
    }
}

/// Insert on any executor (pool or open transaction)
pub(crate) async fn insert_record<'e, E>(executor: E, job: &JobRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let error_json = encode_error(job.error.as_ref())?;

    sqlx::query(
        r#"
        INSERT INTO job_records (
            id, project_id, name, group_number,
            status, input_ref, result_ref, error,
            created_at, started_at, finished_at,
            attempt_count, max_attempts, cancel_requested,
            worker_id, lease_expires_at, version
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.id)
    .bind(&job.project_id)
    .bind(&job.name)
    .bind(job.group)
    .bind(job.status.as_str())
    .bind(job.input_ref.as_str())
    .bind(job.result_ref.as_ref().map(|r| r.as_str()))
    .bind(error_json)
    .bind(job.created_at)
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(job.attempt_count as i64)
    .bind(job.max_attempts as i64)
    .bind(job.cancel_requested)
    .bind(&job.worker_id)
    .bind(job.lease_expires_at)
    .bind(job.version)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

fn encode_error(error: Option<&JobError>) -> Result<Option<String>> {
    error.map(serde_json::to_string).transpose().map_err(AppError::from)
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &JobRecord) -> Result<()> {
        insert_record(&self.pool, job).await
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM job_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_record).transpose()
    }

    async fn compare_and_set(&self, expected: JobStatus, job: &mut JobRecord) -> Result<bool> {
        let error_json = encode_error(job.error.as_ref())?;

        // Immutable columns (id, project, name, group, input, created_at, budget) are never written
        let result = sqlx::query(
            r#"
            UPDATE job_records
            SET status = ?, result_ref = ?, error = ?,
                started_at = ?, finished_at = ?,
                attempt_count = ?, cancel_requested = ?,
                worker_id = ?, lease_expires_at = ?,
                version = version + 1
            WHERE id = ? AND status = ? AND version = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.result_ref.as_ref().map(|r| r.as_str()))
        .bind(error_json)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.attempt_count as i64)
        .bind(job.cancel_requested)
        .bind(&job.worker_id)
        .bind(job.lease_expires_at)
        .bind(&job.id)
        .bind(expected.as_str())
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            job.version += 1;
            return Ok(true);
        }

        // Distinguish a lost race from an unknown id
        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM job_records WHERE id = ?")
            .bind(&job.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match exists {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("Job {} not found", job.id))),
        }
    }

    async fn latest_group(&self, project_id: &str) -> Result<Option<GroupNumber>> {
        sqlx::query_scalar("SELECT latest_group FROM project_groups WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_by_project_group(
        &self,
        project_id: &str,
        group: GroupNumber,
    ) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM job_records
            WHERE project_id = ? AND group_number = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(project_id)
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_record).collect()
    }

    async fn find_expired_leases(&self, now_millis: i64) -> Result<Vec<JobRecord>> {
        self.fetch_all(
            r#"
            SELECT * FROM job_records
            WHERE status = 'RUNNING'
              AND (lease_expires_at IS NULL OR lease_expires_at < ?)
            ORDER BY created_at ASC, id ASC
            "#,
            &[now_millis],
        )
        .await
    }

    async fn find_stale_pending(&self, created_before: i64) -> Result<Vec<JobRecord>> {
        self.fetch_all(
            r#"
            SELECT * FROM job_records
            WHERE status = 'PENDING' AND created_at < ?
            ORDER BY created_at ASC, id ASC
            "#,
            &[created_before],
        )
        .await
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM job_records WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl TransactionalJobRepository for SqliteJobRepository {
    async fn begin_transaction(&self) -> Result<Box<dyn JobRepositoryTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteJobTransaction::new(tx)))
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    project_id: String,
    name: String,
    group_number: i64,
    status: String,
    input_ref: String,
    result_ref: Option<String>,
    error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    attempt_count: i64,
    max_attempts: i64,
    cancel_requested: bool,
    worker_id: Option<String>,
    lease_expires_at: Option<i64>,
    version: i64,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        let status: JobStatus = self.status.parse()?;
        let error = match self.error {
            Some(json) => Some(serde_json::from_str::<JobError>(&json).map_err(|e| {
                AppError::Database(format!("Job {} has a corrupt error column: {}", self.id, e))
            })?),
            None => None,
        };

        Ok(JobRecord {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            group: self.group_number,
            status,
            input_ref: BlobRef::new(self.input_ref),
            result_ref: self.result_ref.map(BlobRef::new),
            error,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            attempt_count: self.attempt_count.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            cancel_requested: self.cancel_requested,
            worker_id: self.worker_id,
            lease_expires_at: self.lease_expires_at,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use utagms_core::domain::JobErrorKind;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = JobRecord::new_test("project-1", BlobRef::new("blob-1"));

        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.input_ref, job.input_ref);
        assert_eq!(found.max_attempts, 3);
        assert!(repo.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = JobRecord::new_test("project-1", BlobRef::new("blob-1"));
        tokio_test::assert_ok!(repo.insert(&job).await);
        let err = tokio_test::assert_err!(repo.insert(&job).await);
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_compare_and_set_single_winner() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let job = JobRecord::new_test("project-1", BlobRef::new("blob-1"));
        repo.insert(&job).await.unwrap();

        let mut first = repo.find_by_id(&job.id).await.unwrap().unwrap();
        let mut second = first.clone();
        first.start(5_000, "w-1", 60_000).unwrap();
        second.start(5_000, "w-2", 60_000).unwrap();

        assert!(repo.compare_and_set(JobStatus::Pending, &mut first).await.unwrap());
        assert!(!repo.compare_and_set(JobStatus::Pending, &mut second).await.unwrap());
        assert_eq!(first.version, 1);

        let stored = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.worker_id.as_deref(), Some("w-1"));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_set_round_trips_error() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let mut job = JobRecord::new("job-err", 1_000, "project-1", "n", 1, BlobRef::new("b"), 3);
        repo.insert(&job).await.unwrap();

        job.start(5_000, "w-1", 60_000).unwrap();
        assert!(repo.compare_and_set(JobStatus::Pending, &mut job).await.unwrap());
        job.begin_attempt().unwrap();
        let mut error = JobError::new(JobErrorKind::SolverCrash, "exit 1", 1);
        error.exit_code = Some(1);
        error.stderr = Some("Traceback".into());
        job.fail(6_000, error.clone()).unwrap();
        assert!(repo.compare_and_set(JobStatus::Running, &mut job).await.unwrap());

        let stored = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error, Some(error));
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.worker_id.is_none());
        assert_eq!(stored.finished_at, Some(6_000));

        // Terminal rows never match a non-terminal expectation
        let mut again = stored.clone();
        assert!(!repo.compare_and_set(JobStatus::Running, &mut again).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_set_unknown_job() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        let mut job = JobRecord::new_test("project-1", BlobRef::new("blob-1"));
        assert!(matches!(
            repo.compare_and_set(JobStatus::Pending, &mut job).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lease_and_staleness_queries() {
        let repo = SqliteJobRepository::new(setup_test_db().await);

        let pending = JobRecord::new("j-pending", 1_000, "p", "n", 1, BlobRef::new("b"), 3);
        let mut running = JobRecord::new("j-running", 2_000, "p", "n", 1, BlobRef::new("b"), 3);
        repo.insert(&pending).await.unwrap();
        repo.insert(&running).await.unwrap();
        running.start(3_000, "w", 10_000).unwrap();
        assert!(repo.compare_and_set(JobStatus::Pending, &mut running).await.unwrap());

        assert!(repo.find_expired_leases(9_999).await.unwrap().is_empty());
        let expired = repo.find_expired_leases(10_001).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "j-running");

        assert!(repo.find_stale_pending(1_000).await.unwrap().is_empty());
        let stale = repo.find_stale_pending(1_001).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "j-pending");

        assert_eq!(repo.count_by_status(JobStatus::Running).await.unwrap(), 1);
        assert_eq!(repo.count_by_status(JobStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_group_transaction() {
        let repo = SqliteJobRepository::new(setup_test_db().await);
        assert_eq!(repo.latest_group("p").await.unwrap(), None);

        let mut tx = repo.begin_transaction().await.unwrap();
        let group = tx.next_group("p").await.unwrap();
        assert_eq!(group, 1);
        for name in ["a", "b"] {
            let job = JobRecord::new(
                format!("job-{}", name),
                1_000,
                "p",
                name,
                group,
                BlobRef::new("b"),
                3,
            );
            tx.insert(&job).await.unwrap();
        }
        tx.commit().await.unwrap();

        // Rolled back allocations are not visible
        let mut tx = repo.begin_transaction().await.unwrap();
        assert_eq!(tx.next_group("p").await.unwrap(), 2);
        tx.rollback().await.unwrap();

        assert_eq!(repo.latest_group("p").await.unwrap(), Some(1));
        let jobs = repo.find_by_project_group("p", 1).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "a");
    }
}
