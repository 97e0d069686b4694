use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub worker: WorkerConfig,
    pub schedule: ScheduleConfig,
    pub timetable: TimetableConfig,
    pub preferences: PreferenceDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub sentinel_enabled: bool,
    pub sentinel_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
    pub task_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_daily_hour")]
    pub daily_hour: u32,  // local hour of day, 0..24
    pub run_on_startup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimetableConfig {
    pub request_timeout_secs: u64,
    pub range_days: u32,
}

/// Values used when a user never touched a preference.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PreferenceDefaults {
    pub notifications_enable_default: bool,
    pub automute_enable_default: bool,
}

fn default_daily_hour() -> u32 {
    crate::worker::DEFAULT_DAILY_HOUR
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.schedule.daily_hour >= 24 {
            return Err(config::ConfigError::Message(format!(
                "schedule.daily_hour must be within 0..24, got {}",
                self.schedule.daily_hour
            )));
        }
        if self.worker.worker_count == 0 || self.worker.max_concurrent_tasks == 0 {
            return Err(config::ConfigError::Message(
                "worker.worker_count and worker.max_concurrent_tasks must be non-zero".into(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "worker.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
