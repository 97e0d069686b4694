use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use crate::config::WorkerConfig;
use crate::errors::{WorkerError, WorkerResult};
use crate::models::{TaskKind, TaskRequest, TaskStatus};
use crate::services::TaskQueue;
use super::schedule::DailyScheduler;

// Upper bound for a single retry delay regardless of configuration.
const MAX_BACKOFF_SECS: i64 = 30 * 24 * 60 * 60;

/// A unit of work the runner can execute for a claimed task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskRequest) -> WorkerResult<()>;
}

#[derive(Clone)]
pub struct Handlers {
    daily_refresh: Arc<dyn TaskHandler>,
    notification_setup: Arc<dyn TaskHandler>,
    auto_mute_setup: Arc<dyn TaskHandler>,
}

impl Handlers {
    pub fn new(
        daily_refresh: Arc<dyn TaskHandler>,
        notification_setup: Arc<dyn TaskHandler>,
        auto_mute_setup: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            daily_refresh,
            notification_setup,
            auto_mute_setup,
        }
    }

    fn for_kind(&self, kind: TaskKind) -> Arc<dyn TaskHandler> {
        match kind {
            TaskKind::DailyRefresh => self.daily_refresh.clone(),
            TaskKind::NotificationSetup => self.notification_setup.clone(),
            TaskKind::AutoMuteSetup => self.auto_mute_setup.clone(),
        }
    }
}

/// Exponential backoff for failed tasks.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base_secs: config.backoff_base_secs,
            backoff_max_secs: config.backoff_max_secs,
        }
    }

    /// `attempt` counts from zero for the first run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    pub fn backoff_secs(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.backoff_base_secs
            .saturating_mul(factor)
            .min(self.backoff_max_secs)
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    queue: Arc<dyn TaskQueue>,
    handlers: Handlers,
    daily: DailyScheduler,
    retry: RetryPolicy,
    task_timeout: Duration,
    poll_interval: Duration,
}

impl TaskRunner {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        handlers: Handlers,
        daily: DailyScheduler,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handlers,
            daily,
            retry: RetryPolicy::from_config(config),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            poll_interval: config.poll_interval(),
        }
    }

    #[cfg(test)]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Claims and executes at most one due task. Returns whether a task was found.
    pub async fn run_once(&self) -> WorkerResult<bool> {
        let Some(task) = self.queue.pop_due(Utc::now()).await? else {
            return Ok(false);
        };

        let task_id = task.task_id;
        tracing::debug!(%task_id, kind = %task.kind, attempt = task.attempt, "Processing task");

        let handler = self.handlers.for_kind(task.kind);
        match process_task_with_timeout(handler, task.clone(), self.task_timeout).await {
            Ok(()) => {
                tracing::info!(%task_id, kind = %task.kind, "Task completed successfully");
                if let Err(e) = self.queue.mark(&task, TaskStatus::Completed).await {
                    tracing::error!(%task_id, "Failed to update task status: {}", e);
                }
            }
            Err(e) => {
                tracing::error!(%task_id, kind = %task.kind, attempt = task.attempt, "Task failed: {}", e);
                self.handle_failure(&task).await?;
            }
        }
        Ok(true)
    }

    /// Queues another attempt, or gives the task up. A daily refresh that is
    /// given up still leaves the next day's run pending.
    async fn handle_failure(&self, task: &TaskRequest) -> WorkerResult<()> {
        if self.retry.should_retry(task.attempt) {
            match self.enqueue_retry(task).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::error!(task_id = %task.task_id, "Failed to queue retry: {}", e);
                }
            }
        } else {
            tracing::warn!(task_id = %task.task_id, attempts = task.attempt + 1, "Giving up on task");
        }

        let marked = self.queue.mark(task, TaskStatus::Failed).await;
        if let Err(e) = &marked {
            tracing::error!(task_id = %task.task_id, "Failed to update task status: {}", e);
        }

        if task.kind == TaskKind::DailyRefresh {
            let next = self.daily.schedule_next().await?;
            tracing::warn!(
                failed_task = %task.task_id,
                next_task = %next.task_id,
                due = %next.due_time,
                "Daily refresh given up, next day's run kept"
            );
        }
        marked
    }

    async fn enqueue_retry(&self, task: &TaskRequest) -> WorkerResult<()> {
        let backoff = self.retry.backoff_secs(task.attempt);
        let delay = i64::try_from(backoff).unwrap_or(MAX_BACKOFF_SECS).min(MAX_BACKOFF_SECS);
        let due = Utc::now() + chrono::Duration::seconds(delay);
        let retry = task.retry_at(due);
        self.queue.enqueue(&retry).await?;

        tracing::warn!(
            task_id = %task.task_id,
            next_attempt = retry.attempt,
            backoff_secs = backoff,
            "Task scheduled for retry"
        );
        Ok(())
    }
}

// Runs the handler on its own tokio task so panics are caught and the run can
// be abandoned when it exceeds the timeout.
async fn process_task_with_timeout(
    handler: Arc<dyn TaskHandler>,
    task: TaskRequest,
    timeout: Duration,
) -> WorkerResult<()> {
    let mut join = tokio::spawn(async move { handler.handle(&task).await });

    match tokio::time::timeout(timeout, &mut join).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!("Task panicked: {}", e);
            Err(WorkerError::TaskPanic(e.to_string()))
        }
        Err(_elapsed) => {
            join.abort();
            tracing::error!("Task timed out after {} seconds", timeout.as_secs());
            Err(WorkerError::Timeout(timeout.as_secs()))
        }
    }
}

async fn idle(interval: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = sleep(interval) => {}
    }
}

pub async fn worker_process(
    runner: TaskRunner,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    tracing::info!("Worker started");

    loop {
        // First acquire the semaphore before claiming a task
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => permit,
        };
        let permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!("Failed to acquire semaphore: {}", e);
                idle(runner.poll_interval, &shutdown).await;
                continue;
            }
        };

        match runner.run_once().await {
            Ok(true) => drop(permit),
            Ok(false) => {
                // Nothing due, release the permit and wait before checking again
                drop(permit);
                idle(runner.poll_interval, &shutdown).await;
            }
            Err(e) => {
                tracing::error!("Task queue error: {}", e);
                drop(permit);
                idle(runner.poll_interval, &shutdown).await;
            }
        }
    }

    tracing::info!("Worker stopped");
}
