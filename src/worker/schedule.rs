use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use std::sync::Arc;
use crate::errors::{WorkerError, WorkerResult};
use crate::models::{TaskKind, TaskRequest};
use crate::services::TaskQueue;
use super::TAG_DAILY_WORK;

pub const DEFAULT_DAILY_HOUR: u32 = 2;

// Steps tried when the target wall-clock time falls into a DST gap.
const GAP_STEP_MINUTES: i64 = 15;
const GAP_MAX_STEPS: i64 = 8;

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    for step in 0..=GAP_MAX_STEPS {
        let candidate = naive + Duration::minutes(step * GAP_STEP_MINUTES);
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved;
        }
    }
    tz.from_utc_datetime(&naive)
}

/// Next occurrence of `hour:00:00` strictly in the future of `now`'s hour:
/// today if the current hour is still before `hour`, tomorrow otherwise.
/// Returns `None` for an hour outside `0..24`.
pub fn next_due_time<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    let today = now.date_naive();
    let date = if now.hour() < hour { today } else { today.succ_opt()? };
    let naive = date.and_hms_opt(hour, 0, 0)?;
    Some(resolve_local(&now.timezone(), naive))
}

/// Whole seconds from `now` until `due`, never negative.
pub fn initial_delay_secs<Tz: TimeZone>(now: &DateTime<Tz>, due: &DateTime<Tz>) -> i64 {
    due.clone()
        .signed_duration_since(now.clone())
        .num_seconds()
        .max(0)
}

/// Keeps exactly one daily refresh pending in the task queue.
#[derive(Clone)]
pub struct DailyScheduler {
    queue: Arc<dyn TaskQueue>,
    hour: u32,
}

impl DailyScheduler {
    pub fn new(queue: Arc<dyn TaskQueue>, hour: u32) -> WorkerResult<Self> {
        if hour >= 24 {
            return Err(WorkerError::InvalidInput(format!(
                "daily refresh hour must be within 0..24, got {}",
                hour
            )));
        }
        Ok(Self { queue, hour })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Builds the delayed request for the next daily run as seen from `now`.
    pub fn next_request<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> WorkerResult<TaskRequest> {
        let due = next_due_time(now, self.hour).ok_or_else(|| {
            WorkerError::Processing(format!("no due time for hour {} after {}", self.hour, now.naive_local()))
        })?;
        let delay = initial_delay_secs(now, &due);

        Ok(TaskRequest::new_at(TaskKind::DailyRefresh, now.with_timezone(&Utc))
            .with_initial_delay(delay)
            .add_tag(TAG_DAILY_WORK))
    }

    /// Replaces any pending daily refresh by one due at the next configured hour.
    pub async fn schedule_next_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> WorkerResult<TaskRequest>
    where
        Tz::Offset: Send + Sync,
    {
        let request = self.next_request(now)?;
        self.replace_pending(&request).await?;

        tracing::info!(
            task_id = %request.task_id,
            due = %request.due_time,
            delay_secs = (request.due_time - request.created_at).num_seconds(),
            "Next daily refresh scheduled"
        );
        Ok(request)
    }

    pub async fn schedule_next(&self) -> WorkerResult<TaskRequest> {
        self.schedule_next_at(&Local::now()).await
    }

    /// Replaces any pending daily refresh by one that is due right away.
    pub async fn enqueue_immediate(&self) -> WorkerResult<TaskRequest> {
        let request = TaskRequest::new(TaskKind::DailyRefresh).add_tag(TAG_DAILY_WORK);
        self.replace_pending(&request).await?;

        tracing::info!(task_id = %request.task_id, "Immediate daily refresh queued");
        Ok(request)
    }

    async fn replace_pending(&self, request: &TaskRequest) -> WorkerResult<()> {
        let cancelled = self.queue.cancel_by_tag(TAG_DAILY_WORK).await?;
        if cancelled > 0 {
            tracing::debug!(cancelled, "Replaced pending daily refresh");
        }
        self.queue.enqueue(request).await
    }
}
