use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// Define task status enum
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    DailyRefresh,
    NotificationSetup,
    AutoMuteSetup,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::DailyRefresh => "daily_refresh",
            TaskKind::NotificationSetup => "notification_setup",
            TaskKind::AutoMuteSetup => "auto_mute_setup",
        };
        f.write_str(name)
    }
}

/// One unit of work waiting in (or claimed from) the delayed task queue.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskRequest {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub tags: Vec<String>,
    pub input: BTreeMap<String, String>,
    pub due_time: DateTime<Utc>,
    pub attempt: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl TaskRequest {
    /// A request that is due immediately.
    pub fn new(kind: TaskKind) -> Self {
        Self::new_at(kind, Utc::now())
    }

    /// A request created at `now`; delays are resolved against this instant.
    pub fn new_at(kind: TaskKind, now: DateTime<Utc>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            kind,
            tags: Vec::new(),
            input: BTreeMap::new(),
            due_time: now,
            attempt: 0,
            status: TaskStatus::Queued,
            created_at: now,
        }
    }

    pub fn add_tag(mut self, tag: &str) -> Self {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
        self
    }

    /// Resolves the due time relative to the creation time of the request.
    pub fn with_initial_delay(mut self, seconds: i64) -> Self {
        self.due_time = self.created_at + Duration::seconds(seconds.max(0));
        self
    }

    pub fn with_input(mut self, key: &str, value: impl ToString) -> Self {
        self.input.insert(key.to_string(), value.to_string());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn input_value(&self, key: &str) -> Option<&str> {
        self.input.get(key).map(String::as_str)
    }

    /// Copy of this request scheduled for another attempt at `due_time`.
    pub fn retry_at(&self, due_time: DateTime<Utc>) -> Self {
        Self {
            due_time,
            attempt: self.attempt + 1,
            status: TaskStatus::Queued,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_delay_is_relative_to_creation() {
        let request = TaskRequest::new(TaskKind::DailyRefresh).with_initial_delay(3600);
        assert_eq!(request.due_time - request.created_at, Duration::seconds(3600));
    }

    #[test]
    fn negative_delay_means_due_now() {
        let request = TaskRequest::new(TaskKind::DailyRefresh).with_initial_delay(-5);
        assert_eq!(request.due_time, request.created_at);
    }

    #[test]
    fn tags_are_not_duplicated() {
        let request = TaskRequest::new(TaskKind::AutoMuteSetup)
            .add_tag("AutoMuteSetupWork")
            .add_tag("AutoMuteSetupWork");
        assert_eq!(request.tags, vec!["AutoMuteSetupWork".to_string()]);
    }

    #[test]
    fn retry_keeps_identity_and_payload() {
        let request = TaskRequest::new(TaskKind::NotificationSetup).with_input("UserId", 7);
        let later = request.due_time + Duration::seconds(30);
        let retry = request.retry_at(later);

        assert_eq!(retry.task_id, request.task_id);
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.due_time, later);
        assert_eq!(retry.input_value("UserId"), Some("7"));
    }
}
