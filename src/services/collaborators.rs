//! Seams between the workers and the stores they read and write.
//!
//! Workers only see these traits, which keeps the refresh workflow free of
//! Redis and HTTP details and lets the tests drive it with in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::RedisResult;
use crate::errors::{FetchResult, WorkerResult};
use crate::models::{TaskRequest, TaskStatus, Timetable, TimetableElement, User};

/// Accounts known to this installation, in registration order.
#[async_trait]
pub trait UserRegistry: Send + Sync {
    async fn list_users(&self) -> WorkerResult<Vec<User>>;

    async fn get_user(&self, user_id: i64) -> WorkerResult<Option<User>>;
}

/// Loads a timetable from the school server and refreshes the local cache.
#[async_trait]
pub trait TimetableFetcher: Send + Sync {
    async fn load_timetable(&self, user: &User, element: &TimetableElement) -> FetchResult<Timetable>;
}

#[async_trait]
pub trait TimetableCache: Send + Sync {
    async fn store_timetable(&self, timetable: &Timetable) -> RedisResult<()>;

    async fn cached_timetable(
        &self,
        user_id: i64,
        element: &TimetableElement,
    ) -> RedisResult<Option<Timetable>>;
}

/// Per-user boolean settings.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn read_bool(&self, user_id: i64, key: &str, default: bool) -> WorkerResult<bool>;
}

/// Delayed task queue shared by the scheduler, the workers and the runner.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, request: &TaskRequest) -> WorkerResult<()>;

    /// Drops every still-pending task carrying `tag`, returning how many were removed.
    async fn cancel_by_tag(&self, tag: &str) -> WorkerResult<usize>;

    /// Claims the earliest task due at or before `now`, if any.
    async fn pop_due(&self, now: DateTime<Utc>) -> WorkerResult<Option<TaskRequest>>;

    /// Records how a claimed task ended (`Completed` or `Failed`).
    async fn mark(&self, task: &TaskRequest, status: TaskStatus) -> WorkerResult<()>;
}
