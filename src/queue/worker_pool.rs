//! Fixed-size pool of tokio workers draining the [`JobQueue`].

use super::{JobQueue, backoff_secs};
use crate::{
    errors::{AppError, AppResult},
    models::job::{BucketJobPayload, Job},
    services::task_executor::TaskExecutor,
};
use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct WorkerPool {
    queue: JobQueue,
    executor: TaskExecutor,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, executor: TaskExecutor, poll_interval: Duration) -> Self {
        Self {
            queue,
            executor,
            poll_interval,
        }
    }

    /// Put jobs orphaned by a previous process back in line.
    pub async fn recover(&self) -> AppResult<u64> {
        let requeued = self.queue.requeue_stale().await?;
        if requeued > 0 {
            info!(requeued, "requeued jobs left running by a previous process");
        }
        Ok(requeued)
    }

    /// Start `concurrency` workers. They stop polling once `shutdown` is
    /// cancelled; a job already in hand is finished first.
    pub fn spawn(&self, concurrency: usize, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(workers = concurrency, poll_ms = self.poll_interval.as_millis() as u64, "starting worker pool");
        (0..concurrency.max(1))
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(self, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => warn!(worker, error = %err, "job queue poll failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(worker, "worker stopped");
    }

    /// Claim and process one due job. Returns `false` when the queue had
    /// nothing to hand out.
    pub async fn run_once(&self) -> AppResult<bool> {
        match self.queue.claim_next(Utc::now().timestamp()).await? {
            Some(job) => {
                self.process(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Process due jobs until none is left, returning how many ran.
    pub async fn drain(&self) -> AppResult<usize> {
        let mut processed = 0;
        while self.run_once().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn process(&self, job: Job) -> AppResult<()> {
        let payload: BucketJobPayload = match serde_json::from_str(&job.payload) {
            Ok(payload) => payload,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "malformed job payload");
                return self.queue.bury(job.id, &format!("malformed payload: {err}")).await;
            }
        };

        let limit = Duration::from_secs(job.timeout_secs.max(1) as u64);
        debug!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, task_id = %payload.task_id, "job claimed");
        let outcome = match tokio::time::timeout(limit, self.executor.execute(job.kind, &payload)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::internal(format!(
                "job timed out after {}s",
                limit.as_secs()
            ))),
        };

        match outcome {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                info!(job_id = %job.id, kind = %job.kind, task_id = %payload.task_id, "job done");
            }
            Err(err) if err.is_retryable() && !job.retries_exhausted() => {
                let delay = backoff_secs(job.attempts);
                warn!(
                    job_id = %job.id,
                    task_id = %payload.task_id,
                    attempt = job.attempts,
                    retry_in_secs = delay,
                    error = %err,
                    "job attempt failed, will retry"
                );
                self.queue
                    .retry_later(job.id, &err.to_string(), Utc::now().timestamp() + delay)
                    .await?;
            }
            Err(err) => {
                let cause = err.to_string();
                error!(
                    job_id = %job.id,
                    task_id = %payload.task_id,
                    attempts = job.attempts,
                    error = %cause,
                    "job failed permanently"
                );
                // Task first: a failed bury must not leave it `running`.
                self.executor.on_exhausted(&payload, &cause).await;
                self.queue.bury(job.id, &cause).await?;
            }
        }
        Ok(())
    }
}
