mod collaborators;
mod redis_service;
mod timetable_loader;

pub use collaborators::{UserRegistry, TimetableFetcher, TimetableCache, PreferenceStore, TaskQueue};
pub use redis_service::RedisService;
pub use timetable_loader::TimetableLoader;
