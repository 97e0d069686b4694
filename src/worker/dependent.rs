use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use crate::errors::{WorkerError, WorkerResult};
use crate::models::{Period, TaskRequest, Timetable, User};
use crate::services::{TimetableCache, UserRegistry};
use super::runner::TaskHandler;
use super::WORKER_DATA_USER_ID;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakReminder {
    pub at: NaiveDateTime,
    pub next_start: NaiveDateTime,
    pub next_subjects: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// One reminder per gap between consecutive lessons. Expects `periods` sorted by start.
pub fn plan_break_reminders(periods: &[&Period]) -> Vec<BreakReminder> {
    periods
        .windows(2)
        .filter(|pair| pair[0].end_date_time < pair[1].start_date_time)
        .map(|pair| BreakReminder {
            at: pair[0].end_date_time,
            next_start: pair[1].start_date_time,
            next_subjects: pair[1].subjects.clone(),
        })
        .collect()
}

/// Lesson intervals with touching or overlapping lessons merged.
pub fn plan_mute_windows(periods: &[&Period]) -> Vec<MuteWindow> {
    let mut windows: Vec<MuteWindow> = Vec::new();
    for period in periods {
        match windows.last_mut() {
            Some(last) if period.start_date_time <= last.end => {
                last.end = last.end.max(period.end_date_time);
            }
            _ => windows.push(MuteWindow {
                start: period.start_date_time,
                end: period.end_date_time,
            }),
        }
    }
    windows
}

fn user_id_input(task: &TaskRequest) -> WorkerResult<i64> {
    let raw = task.input_value(WORKER_DATA_USER_ID).ok_or_else(|| {
        WorkerError::InvalidInput(format!("task {} carries no {}", task.task_id, WORKER_DATA_USER_ID))
    })?;
    raw.parse().map_err(|e| {
        WorkerError::InvalidInput(format!("{} {:?} is not a user id: {}", WORKER_DATA_USER_ID, raw, e))
    })
}

/// Shared lookup for workers that only run on top of an already cached
/// personal timetable.
#[derive(Clone)]
struct CachedTimetableSource {
    users: Arc<dyn UserRegistry>,
    cache: Arc<dyn TimetableCache>,
}

impl CachedTimetableSource {
    async fn load(&self, task: &TaskRequest) -> WorkerResult<Option<(User, Timetable)>> {
        let user_id = user_id_input(task)?;
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| WorkerError::Processing(format!("User {} not found", user_id)))?;

        let Some(element) = user.personal_timetable else {
            return Ok(None);
        };
        let timetable = self.cache.cached_timetable(user.id, &element).await?;
        Ok(timetable.map(|timetable| (user, timetable)))
    }
}

pub struct NotificationSetupWorker {
    source: CachedTimetableSource,
}

impl NotificationSetupWorker {
    pub fn new(users: Arc<dyn UserRegistry>, cache: Arc<dyn TimetableCache>) -> Self {
        Self {
            source: CachedTimetableSource { users, cache },
        }
    }

    pub async fn plan(&self, task: &TaskRequest, date: NaiveDate) -> WorkerResult<Vec<BreakReminder>> {
        let Some((user, timetable)) = self.source.load(task).await? else {
            return Ok(Vec::new());
        };
        let reminders = plan_break_reminders(&timetable.active_periods_on(date));

        for reminder in &reminders {
            tracing::debug!(
                user_id = user.id,
                at = %reminder.at,
                next_start = %reminder.next_start,
                next_subjects = ?reminder.next_subjects,
                "Break reminder planned"
            );
        }
        tracing::info!(user_id = user.id, reminders = reminders.len(), %date, "Notifications set up");
        Ok(reminders)
    }
}

#[async_trait]
impl TaskHandler for NotificationSetupWorker {
    async fn handle(&self, task: &TaskRequest) -> WorkerResult<()> {
        self.plan(task, Local::now().date_naive()).await.map(|_| ())
    }
}

pub struct AutoMuteSetupWorker {
    source: CachedTimetableSource,
}

impl AutoMuteSetupWorker {
    pub fn new(users: Arc<dyn UserRegistry>, cache: Arc<dyn TimetableCache>) -> Self {
        Self {
            source: CachedTimetableSource { users, cache },
        }
    }

    pub async fn plan(&self, task: &TaskRequest, date: NaiveDate) -> WorkerResult<Vec<MuteWindow>> {
        let Some((user, timetable)) = self.source.load(task).await? else {
            return Ok(Vec::new());
        };
        let windows = plan_mute_windows(&timetable.active_periods_on(date));

        for window in &windows {
            tracing::debug!(user_id = user.id, start = %window.start, end = %window.end, "Mute window planned");
        }
        tracing::info!(user_id = user.id, windows = windows.len(), %date, "Auto-mute set up");
        Ok(windows)
    }
}

#[async_trait]
impl TaskHandler for AutoMuteSetupWorker {
    async fn handle(&self, task: &TaskRequest) -> WorkerResult<()> {
        self.plan(task, Local::now().date_naive()).await.map(|_| ())
    }
}
