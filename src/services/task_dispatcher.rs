//! TaskDispatcher: accepts bulk bucket operations, records a task for the
//! client to poll and hands the work to the job queue.

use crate::{
    auth::{
        AuthContext,
        policy::{self, Decision, Operation},
    },
    errors::{AppError, AppResult},
    models::{
        bucket::Bucket,
        job::{BucketJobPayload, JobKind},
        task::{Task, TaskKind, TaskStatus},
    },
    queue::{EnqueueOptions, JobQueue},
    services::{metadata_store::MetadataStore, storage_service::ensure_bucket_name_safe},
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

const NOT_OWNED: &str = "bucket not found or not owned by user";

/// Queue settings per kind of bulk operation.
#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    pub empty: EnqueueOptions,
    pub copy: EnqueueOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchedTask {
    pub task_id: Uuid,
    pub message: String,
}

/// What a polling client sees of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub progress: i64,
    pub message: String,
}

impl From<Task> for TaskProgress {
    fn from(task: Task) -> Self {
        Self {
            status: task.status,
            progress: task.progress,
            message: task.message,
        }
    }
}

#[derive(Clone)]
pub struct TaskDispatcher {
    store: MetadataStore,
    queue: JobQueue,
    limits: TaskLimits,
}

impl TaskDispatcher {
    pub fn new(store: MetadataStore, queue: JobQueue, limits: TaskLimits) -> Self {
        Self {
            store,
            queue,
            limits,
        }
    }

    /// Schedule removal of every file in `bucket`.
    pub async fn dispatch_empty(&self, caller: &AuthContext, bucket: &str) -> AppResult<DispatchedTask> {
        let src = self.owned_bucket(caller, bucket).await?;
        let task = new_task(caller, TaskKind::Empty, &src.name, None);
        let task_id = task.id;
        let payload = BucketJobPayload {
            task_id,
            user_id: caller.user_id,
            bucket_src: src.name.clone(),
            bucket_dest: None,
        };
        self.persist_and_enqueue(task, JobKind::EmptyBucket, payload, self.limits.empty)
            .await?;

        Ok(DispatchedTask {
            task_id,
            message: format!("emptying bucket `{}`", src.name),
        })
    }

    /// Schedule a copy of every file in `src` into `dest`, creating `dest`
    /// first when the caller has no bucket of that name.
    pub async fn dispatch_copy(
        &self,
        caller: &AuthContext,
        src: &str,
        dest: &str,
    ) -> AppResult<DispatchedTask> {
        if src == dest {
            return Err(AppError::validation("source and destination bucket must differ"));
        }
        let src = self.owned_bucket(caller, src).await?;
        let dest = resolve_or_create_destination(&self.store, &src, dest).await?;

        let task = new_task(caller, TaskKind::Copy, &src.name, Some(&dest.name));
        let task_id = task.id;
        let payload = BucketJobPayload {
            task_id,
            user_id: caller.user_id,
            bucket_src: src.name.clone(),
            bucket_dest: Some(dest.name.clone()),
        };
        self.persist_and_enqueue(task, JobKind::CopyBucket, payload, self.limits.copy)
            .await?;

        Ok(DispatchedTask {
            task_id,
            message: format!("copying bucket `{}` to `{}`", src.name, dest.name),
        })
    }

    /// Current state of a task owned by `caller`.
    pub async fn task_progress(&self, caller: &AuthContext, task_id: Uuid) -> AppResult<TaskProgress> {
        let task = self
            .store
            .task_by_id(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task not found"))?;
        if task.user_id != caller.user_id {
            return Err(AppError::authorization("forbidden"));
        }
        Ok(task.into())
    }

    /// Source bucket lookup. A missing bucket and one owned by somebody else
    /// look the same to the caller.
    async fn owned_bucket(&self, caller: &AuthContext, name: &str) -> AppResult<Bucket> {
        ensure_bucket_name_safe(name)?;
        match self.store.bucket_by_name(name).await? {
            Some(bucket)
                if policy::evaluate(&bucket, Operation::DispatchTask, Some(caller))
                    == Decision::Allow =>
            {
                Ok(bucket)
            }
            _ => Err(AppError::not_found(NOT_OWNED)),
        }
    }

    async fn persist_and_enqueue(
        &self,
        task: Task,
        kind: JobKind,
        payload: BucketJobPayload,
        opts: EnqueueOptions,
    ) -> AppResult<()> {
        self.store.insert_task(&task).await?;

        match self.queue.enqueue(kind, &payload, opts).await {
            Ok(job_id) => {
                info!(
                    task_id = %task.id,
                    job_id = %job_id,
                    kind = %kind,
                    bucket = %payload.bucket_src,
                    user_id = %payload.user_id,
                    "task dispatched"
                );
                Ok(())
            }
            Err(err) => {
                let cause = err.to_string();
                error!(task_id = %task.id, error = %cause, "failed to enqueue task job");
                if let Err(mark_err) = self.store.fail_task(task.id, &cause).await {
                    error!(task_id = %task.id, error = %mark_err, "failed to mark task failed");
                }
                Err(AppError::internal(format!("enqueue failed: {cause}")))
            }
        }
    }
}

/// Find the caller's destination bucket or create it from `src`.
///
/// A new destination inherits ACL, versioning flag and region. A name held
/// by another user is a `Conflict`; a destination whose versioning flag
/// differs from the source is a `Validation` error. Losing a creation race
/// re-reads the row instead of failing.
pub async fn resolve_or_create_destination(
    store: &MetadataStore,
    src: &Bucket,
    dest_name: &str,
) -> AppResult<Bucket> {
    ensure_bucket_name_safe(dest_name)?;
    if let Some(existing) = store.bucket_by_name(dest_name).await? {
        return check_destination(src, existing);
    }

    let dest = Bucket {
        id: Uuid::new_v4(),
        name: dest_name.to_string(),
        owner_id: src.owner_id,
        acl: src.acl,
        versioning_enabled: src.versioning_enabled,
        region: src.region.clone(),
        quota_bytes: None,
        created_at: Utc::now(),
    };
    match store.insert_bucket(&dest).await {
        Ok(()) => {
            info!(src = %src.name, dest = %dest.name, "destination bucket created");
            Ok(dest)
        }
        Err(AppError::Conflict(_)) => match store.bucket_by_name(dest_name).await? {
            Some(existing) => check_destination(src, existing),
            None => Err(AppError::internal("destination bucket vanished after conflict")),
        },
        Err(err) => Err(err),
    }
}

fn check_destination(src: &Bucket, dest: Bucket) -> AppResult<Bucket> {
    if dest.owner_id != src.owner_id {
        return Err(AppError::conflict(format!(
            "bucket `{}` already exists",
            dest.name
        )));
    }
    if dest.versioning_enabled != src.versioning_enabled {
        return Err(AppError::validation(
            "destination bucket versioning does not match source",
        ));
    }
    Ok(dest)
}

fn new_task(caller: &AuthContext, kind: TaskKind, src: &str, dest: Option<&str>) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4(),
        user_id: caller.user_id,
        kind,
        bucket_src: src.to_string(),
        bucket_dest: dest.map(str::to_string),
        status: TaskStatus::Running,
        progress: 0,
        message: String::new(),
        created_at: now,
        updated_at: now,
    }
}
