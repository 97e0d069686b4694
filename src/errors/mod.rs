// Error types for each layer of the service, built with thiserror.
use thiserror::Error;

pub mod fetch;
pub mod worker;

// Re-export commonly used types
pub use fetch::{FetchError, FetchResult};
pub use worker::{WorkerError, WorkerResult};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

// Custom result type
pub type AppResult<T> = Result<T, AppError>;
