use thiserror::Error;
use redis::RedisError;
use super::fetch::FetchError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Task timed out after {0} seconds")]
    Timeout(u64),

    #[error("Task panicked: {0}")]
    TaskPanic(String),

    #[error("Timetable loading failed for user {user_id}: {source}")]
    Fetch {
        user_id: i64,
        #[source]
        source: FetchError,
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Invalid task input: {0}")]
    InvalidInput(String),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
