use redis::{aio::Connection, AsyncCommands, Client, RedisResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use crate::errors::{WorkerError, WorkerResult};
use crate::models::{TaskRequest, TaskStatus, Timetable, TimetableElement, User};
use super::collaborators::{PreferenceStore, TaskQueue, TimetableCache, UserRegistry};

const USER_IDS_KEY: &str = "user_ids";
const DELAYED_QUEUE_KEY: &str = "task_queue:delayed";
// Finished tasks are kept around for inspection, then expire.
const FINISHED_TASK_TTL_SECS: usize = 7 * 24 * 60 * 60;
// Due entries looked at per claim attempt.
const CLAIM_BATCH: isize = 8;

pub struct RedisService {
    client: Arc<Client>,
}

fn user_key(user_id: i64) -> String {
    format!("user:{}", user_id)
}

fn preferences_key(user_id: i64) -> String {
    format!("preferences:{}", user_id)
}

fn timetable_key(user_id: i64, element: &TimetableElement) -> String {
    format!("timetable:{}:{}:{}", user_id, element.element_type, element.id)
}

fn task_key(task_id: &str) -> String {
    format!("task:{}", task_id)
}

fn tag_key(tag: &str) -> String {
    format!("task_tag:{}", tag)
}

fn parse_error(what: &'static str, e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, what, e.to_string()))
}

/// Reads a stored preference value, accepting the spellings other clients write.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// The delayed set as seen by a claimer: removing an entry is what takes
/// ownership of the task.
#[async_trait]
trait DelayedSet: Send {
    async fn try_claim(&mut self, task_id: &str) -> RedisResult<bool>;
}

#[async_trait]
impl DelayedSet for Connection {
    async fn try_claim(&mut self, task_id: &str) -> RedisResult<bool> {
        let removed: i64 = self.zrem(DELAYED_QUEUE_KEY, task_id).await?;
        Ok(removed > 0)
    }
}

/// Claims the first candidate nobody else has taken yet.
async fn claim_first<S: DelayedSet + ?Sized>(
    set: &mut S,
    candidates: &[String],
) -> RedisResult<Option<String>> {
    for task_id in candidates {
        if set.try_claim(task_id).await? {
            return Ok(Some(task_id.clone()));
        }
    }
    Ok(None)
}

#[derive(Debug, PartialEq, Eq)]
enum TagMember {
    /// Was still waiting and has just been removed from the delayed set.
    Cancelled,
    /// Points at a task that is gone or already finished.
    Stale,
    /// Claimed by a worker and not finished yet.
    Active,
}

fn classify_tag_member(claimed: bool, stored: Option<&TaskRequest>) -> TagMember {
    if claimed {
        return TagMember::Cancelled;
    }
    match stored.map(|task| task.status) {
        None | Some(TaskStatus::Completed) | Some(TaskStatus::Failed) => TagMember::Stale,
        Some(TaskStatus::Queued) | Some(TaskStatus::Processing) => TagMember::Active,
    }
}

impl RedisService {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    async fn connection(&self) -> RedisResult<Connection> {
        self.client.get_async_connection().await
    }

    async fn load_task(conn: &mut Connection, task_id: &str) -> WorkerResult<Option<TaskRequest>> {
        let task_data: Option<String> = conn.get(task_key(task_id)).await?;
        match task_data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserRegistry for RedisService {
    async fn list_users(&self) -> WorkerResult<Vec<User>> {
        let mut conn = self.connection().await?;
        let ids: Vec<i64> = conn.lrange(USER_IDS_KEY, 0, -1).await?;

        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            let user_data: Option<String> = conn.get(user_key(id)).await?;
            match user_data {
                Some(data) => users.push(serde_json::from_str(&data)?),
                None => tracing::warn!(user_id = id, "User listed in registry but not stored, skipping"),
            }
        }
        Ok(users)
    }

    async fn get_user(&self, user_id: i64) -> WorkerResult<Option<User>> {
        let mut conn = self.connection().await?;
        let user_data: Option<String> = conn.get(user_key(user_id)).await?;
        match user_data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PreferenceStore for RedisService {
    async fn read_bool(&self, user_id: i64, key: &str, default: bool) -> WorkerResult<bool> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.hget(preferences_key(user_id), key).await?;

        match raw {
            None => Ok(default),
            Some(value) => parse_bool(&value).ok_or_else(|| {
                WorkerError::Processing(format!(
                    "Preference {} of user {} is not a boolean: {}",
                    key, user_id, value
                ))
            }),
        }
    }
}

#[async_trait]
impl TimetableCache for RedisService {
    async fn store_timetable(&self, timetable: &Timetable) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(timetable)
            .map_err(|e| parse_error("Failed to serialize timetable", e))?;
        conn.set(timetable_key(timetable.user_id, &timetable.element), data).await
    }

    async fn cached_timetable(
        &self,
        user_id: i64,
        element: &TimetableElement,
    ) -> RedisResult<Option<Timetable>> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn.get(timetable_key(user_id, element)).await?;
        data.map(|data| {
            serde_json::from_str(&data).map_err(|e| parse_error("Failed to parse timetable", e))
        })
        .transpose()
    }
}

#[async_trait]
impl TaskQueue for RedisService {
    async fn enqueue(&self, request: &TaskRequest) -> WorkerResult<()> {
        let mut conn = self.connection().await?;
        let task_id = request.task_id.to_string();
        let data = serde_json::to_string(request)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(task_key(&task_id), data).ignore()
            .zadd(DELAYED_QUEUE_KEY, &task_id, request.due_time.timestamp_millis()).ignore();
        for tag in &request.tags {
            pipe.sadd(tag_key(tag), &task_id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::debug!(
            task_id = %task_id,
            kind = %request.kind,
            due = %request.due_time,
            "Task queued"
        );
        Ok(())
    }

    async fn cancel_by_tag(&self, tag: &str) -> WorkerResult<usize> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(tag_key(tag)).await?;

        let mut cancelled = 0;
        let mut pruned = 0;
        for id in ids {
            // Only tasks still waiting in the delayed set are cancelled; a task
            // that is being processed right now is left alone.
            let claimed = conn.try_claim(&id).await?;
            let stored = if claimed {
                None
            } else {
                let data: Option<String> = conn.get(task_key(&id)).await?;
                data.and_then(|data| serde_json::from_str::<TaskRequest>(&data).ok())
            };

            match classify_tag_member(claimed, stored.as_ref()) {
                TagMember::Cancelled => {
                    let _: () = redis::pipe()
                        .atomic()
                        .del(task_key(&id)).ignore()
                        .srem(tag_key(tag), &id).ignore()
                        .query_async(&mut conn)
                        .await?;
                    cancelled += 1;
                }
                TagMember::Stale => {
                    let _: () = conn.srem(tag_key(tag), &id).await?;
                    pruned += 1;
                }
                TagMember::Active => {}
            }
        }

        if cancelled > 0 || pruned > 0 {
            tracing::debug!(tag, cancelled, pruned, "Cancelled pending tasks");
        }
        Ok(cancelled)
    }

    async fn pop_due(&self, now: DateTime<Utc>) -> WorkerResult<Option<TaskRequest>> {
        let mut conn = self.connection().await?;
        loop {
            let due: Vec<String> = conn
                .zrangebyscore_limit(DELAYED_QUEUE_KEY, "-inf", now.timestamp_millis(), 0, CLAIM_BATCH)
                .await?;
            if due.is_empty() {
                return Ok(None);
            }

            // Lost every race for this batch; the winners removed their
            // entries, so the next range moves on.
            let Some(task_id) = claim_first(&mut conn, &due).await? else {
                continue;
            };

            let Some(mut task) = Self::load_task(&mut conn, &task_id).await? else {
                tracing::warn!(task_id = %task_id, "Queued task has no stored payload, dropping");
                continue;
            };

            task.status = TaskStatus::Processing;
            let _: () = conn.set(task_key(&task_id), serde_json::to_string(&task)?).await?;
            return Ok(Some(task));
        }
    }

    async fn mark(&self, task: &TaskRequest, status: TaskStatus) -> WorkerResult<()> {
        let mut conn = self.connection().await?;
        let task_id = task.task_id.to_string();

        let mut updated = task.clone();
        updated.status = status;
        let data = serde_json::to_string(&updated)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set_ex(task_key(&task_id), data, FINISHED_TASK_TTL_SECS).ignore();
        for tag in &task.tags {
            pipe.srem(tag_key(tag), &task_id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::debug!(task_id = %task_id, status = ?status, "Task status updated");
        Ok(())
    }
}

impl Clone for RedisService {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone()
        }
    }
}
