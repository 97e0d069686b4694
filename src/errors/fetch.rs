use thiserror::Error;
use redis::RedisError;

/// JSON-RPC error code the timetable API answers with when the account may
/// not see the requested element.
pub const ERROR_CODE_NO_RIGHT: i64 = -7004;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed timetable response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No right to view timetable: {0}")]
    Permission(String),

    #[error("Timetable API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Timetable cache error: {0}")]
    Cache(#[from] RedisError),
}

impl FetchError {
    /// Maps a JSON-RPC error object onto the matching variant.
    pub fn from_rpc(code: i64, message: String) -> Self {
        if code == ERROR_CODE_NO_RIGHT {
            FetchError::Permission(message)
        } else {
            FetchError::Api { code, message }
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
