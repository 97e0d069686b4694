//! In-memory stand-ins for the Redis and HTTP backed collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::RedisResult;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use crate::errors::{FetchError, FetchResult, WorkerError, WorkerResult};
use crate::models::{
    ElementType, TaskRequest, TaskStatus, Timetable, TimetableElement, User,
};
use crate::services::{PreferenceStore, TaskQueue, TimetableCache, TimetableFetcher, UserRegistry};

pub fn user(id: i64, personal: Option<i64>) -> User {
    User {
        id,
        profile_name: format!("profile-{}", id),
        api_url: "https://school.example/WebUntis/jsonrpc_intern.do".into(),
        user_name: Some(format!("student{}", id)),
        key: Some("secret".into()),
        personal_timetable: personal.map(|element_id| TimetableElement {
            element_type: ElementType::Student,
            id: element_id,
        }),
    }
}

#[derive(Default)]
pub struct MemoryUsers {
    users: Vec<User>,
}

impl MemoryUsers {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserRegistry for MemoryUsers {
    async fn list_users(&self) -> WorkerResult<Vec<User>> {
        Ok(self.users.clone())
    }

    async fn get_user(&self, user_id: i64) -> WorkerResult<Option<User>> {
        Ok(self.users.iter().find(|u| u.id == user_id).cloned())
    }
}

/// Returns an empty timetable for every user except the ones told to fail,
/// recording who was asked.
#[derive(Default)]
pub struct FakeFetcher {
    failing: HashSet<i64>,
    calls: Mutex<Vec<i64>>,
}

impl FakeFetcher {
    pub fn failing_for(user_ids: &[i64]) -> Self {
        Self {
            failing: user_ids.iter().copied().collect(),
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimetableFetcher for FakeFetcher {
    async fn load_timetable(&self, user: &User, element: &TimetableElement) -> FetchResult<Timetable> {
        self.calls.lock().unwrap().push(user.id);
        if self.failing.contains(&user.id) {
            return Err(FetchError::Permission("no right for timetable".into()));
        }
        let today = Utc::now().date_naive();
        Ok(Timetable {
            user_id: user.id,
            element: *element,
            start_date: today,
            end_date: today,
            periods: Vec::new(),
            fetched_at: Utc::now(),
        })
    }
}

#[derive(Default)]
pub struct MemoryCache {
    timetables: Mutex<HashMap<(i64, TimetableElement), Timetable>>,
}

#[async_trait]
impl TimetableCache for MemoryCache {
    async fn store_timetable(&self, timetable: &Timetable) -> RedisResult<()> {
        self.timetables
            .lock()
            .unwrap()
            .insert((timetable.user_id, timetable.element), timetable.clone());
        Ok(())
    }

    async fn cached_timetable(
        &self,
        user_id: i64,
        element: &TimetableElement,
    ) -> RedisResult<Option<Timetable>> {
        Ok(self.timetables.lock().unwrap().get(&(user_id, *element)).cloned())
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    values: HashMap<(i64, String), bool>,
}

impl MemoryPreferences {
    pub fn with(mut self, user_id: i64, key: &str, value: bool) -> Self {
        self.values.insert((user_id, key.to_string()), value);
        self
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn read_bool(&self, user_id: i64, key: &str, default: bool) -> WorkerResult<bool> {
        Ok(self
            .values
            .get(&(user_id, key.to_string()))
            .copied()
            .unwrap_or(default))
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<Vec<TaskRequest>>,
    marks: Mutex<Vec<(TaskRequest, TaskStatus)>>,
    fail_next_enqueue: AtomicBool,
}

impl MemoryQueue {
    pub fn pending(&self) -> Vec<TaskRequest> {
        self.pending.lock().unwrap().clone()
    }

    pub fn pending_with_tag(&self, tag: &str) -> Vec<TaskRequest> {
        self.pending().into_iter().filter(|t| t.has_tag(tag)).collect()
    }

    pub fn marks(&self) -> Vec<(TaskRequest, TaskStatus)> {
        self.marks.lock().unwrap().clone()
    }

    /// Makes the next `enqueue` call fail as if the store were unreachable.
    pub fn fail_next_enqueue(&self) {
        self.fail_next_enqueue.store(true, Ordering::SeqCst);
    }

    /// Pulls every pending task's due time forward to now.
    pub fn make_all_due(&self) {
        let now = Utc::now();
        for task in self.pending.lock().unwrap().iter_mut() {
            task.due_time = task.due_time.min(now);
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, request: &TaskRequest) -> WorkerResult<()> {
        if self.fail_next_enqueue.swap(false, Ordering::SeqCst) {
            return Err(WorkerError::Processing("task store unavailable".into()));
        }
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|t| t.task_id != request.task_id);
        pending.push(request.clone());
        Ok(())
    }

    async fn cancel_by_tag(&self, tag: &str) -> WorkerResult<usize> {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|t| !t.has_tag(tag));
        Ok(before - pending.len())
    }

    async fn pop_due(&self, now: DateTime<Utc>) -> WorkerResult<Option<TaskRequest>> {
        let mut pending = self.pending.lock().unwrap();
        let next = pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due_time <= now)
            .min_by_key(|(_, t)| t.due_time)
            .map(|(index, _)| index);

        Ok(next.map(|index| {
            let mut task = pending.remove(index);
            task.status = TaskStatus::Processing;
            task
        }))
    }

    async fn mark(&self, task: &TaskRequest, status: TaskStatus) -> WorkerResult<()> {
        self.marks.lock().unwrap().push((task.clone(), status));
        Ok(())
    }
}
