// Submit Use Case

use crate::domain::{
    validate_problem, BlobRef, DecisionProblem, DomainError, JobId, JobRecord, TaskDescriptor,
};
use crate::error::{AppError, Result};
use crate::port::{put_json, BlobStore, IdProvider, TaskQueue, TimeProvider, TransactionalJobRepository};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MAX_NAME_LENGTH: usize = 255;
const MAX_PROJECT_ID_LENGTH: usize = 128;

/// Single-problem submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub project_id: String,
    pub name: String,
    pub problem: DecisionProblem,
}

/// One item of a group submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitItem {
    pub name: String,
    pub problem: DecisionProblem,
}

/// Collaborators of the submit use case
pub struct SubmitContext<'a> {
    pub job_repo: &'a dyn TransactionalJobRepository,
    pub queue: &'a dyn TaskQueue,
    pub blobs: &'a dyn BlobStore,
    pub id_provider: &'a dyn IdProvider,
    pub time_provider: &'a dyn TimeProvider,
    pub max_attempts: u32,
}

pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.trim().is_empty() {
        return Err(AppError::Validation("project_id cannot be empty".to_string()));
    }
    if project_id.len() > MAX_PROJECT_ID_LENGTH {
        return Err(AppError::Validation(format!(
            "project_id too long (max {} chars)",
            MAX_PROJECT_ID_LENGTH
        )));
    }
    Ok(())
}

/// Validate one item (pure, no I/O)
pub fn validate_item(item: &SubmitItem) -> Result<()> {
    if item.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if item.name.len() > MAX_NAME_LENGTH {
        return Err(AppError::Validation(format!(
            "name too long (max {} chars)",
            MAX_NAME_LENGTH
        )));
    }
    validate_problem(&item.problem).map_err(|e| match e {
        DomainError::ValidationError(msg) => {
            AppError::Validation(format!("{}: {}", item.name, msg))
        }
        other => AppError::Domain(other),
    })
}

/// Execute a group submission
///
/// Every item is validated before anything is written. Records of the batch
/// share a freshly allocated group number and are inserted in one transaction;
/// when that fails the payloads written for it are removed again.
/// Descriptors are published after commit; a failed publish is left to the
/// recovery sweep and does not fail the submission.
pub async fn execute(
    ctx: &SubmitContext<'_>,
    project_id: &str,
    items: Vec<SubmitItem>,
) -> Result<Vec<JobId>> {
    validate_project_id(project_id)?;
    if items.is_empty() {
        return Err(AppError::Validation(
            "submission must contain at least one problem".to_string(),
        ));
    }
    for item in &items {
        validate_item(item)?;
    }

    let mut input_refs = Vec::with_capacity(items.len());
    for item in &items {
        match put_json(ctx.blobs, &item.problem).await {
            Ok(blob) => input_refs.push(blob),
            Err(e) => {
                discard_blobs(ctx.blobs, &input_refs).await;
                return Err(e);
            }
        }
    }

    let jobs = match record(ctx, project_id, items, &input_refs).await {
        Ok(jobs) => jobs,
        Err(e) => {
            discard_blobs(ctx.blobs, &input_refs).await;
            return Err(e);
        }
    };

    info!(
        project_id = %project_id,
        group = jobs.first().map(|j| j.group),
        jobs = jobs.len(),
        "Submission recorded"
    );

    for job in &jobs {
        let descriptor = TaskDescriptor {
            job_id: job.id.clone(),
            input_ref: job.input_ref.clone(),
            enqueued_at: ctx.time_provider.now_millis(),
        };
        if let Err(e) = ctx.queue.publish(&descriptor).await {
            warn!(
                job_id = %job.id,
                error = %e,
                "Publish failed; job stays pending until republished"
            );
        }
    }

    Ok(jobs.into_iter().map(|j| j.id).collect())
}

async fn record(
    ctx: &SubmitContext<'_>,
    project_id: &str,
    items: Vec<SubmitItem>,
    input_refs: &[BlobRef],
) -> Result<Vec<JobRecord>> {
    let created_at = ctx.time_provider.now_millis();
    let mut tx = ctx.job_repo.begin_transaction().await?;
    let group = tx.next_group(project_id).await?;

    let mut jobs = Vec::with_capacity(items.len());
    for (item, input_ref) in items.into_iter().zip(input_refs.iter().cloned()) {
        let job = JobRecord::new(
            ctx.id_provider.generate_id(),
            created_at,
            project_id,
            item.name,
            group,
            input_ref,
            ctx.max_attempts,
        );
        tx.insert(&job).await?;
        jobs.push(job);
    }
    tx.commit().await?;
    Ok(jobs)
}

/// Best-effort removal of payloads whose submission did not commit
async fn discard_blobs(blobs: &dyn BlobStore, refs: &[BlobRef]) {
    for blob in refs {
        if let Err(e) = blobs.delete(blob).await {
            warn!(blob = %blob, error = %e, "Could not remove orphaned payload");
        }
    }
}
