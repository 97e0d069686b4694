mod daily;
mod dependent;
mod runner;
mod schedule;
#[cfg(test)]
mod testing;

pub use daily::DailyWorker;
pub use dependent::{AutoMuteSetupWorker, NotificationSetupWorker};
pub use runner::{worker_process, Handlers, TaskRunner};
pub use schedule::{DailyScheduler, DEFAULT_DAILY_HOUR};

pub const TAG_DAILY_WORK: &str = "DailyWork";
pub const TAG_NOTIFICATION_SETUP_WORK: &str = "NotificationSetupWork";
pub const TAG_AUTO_MUTE_SETUP_WORK: &str = "AutoMuteSetupWork";

/// Payload key carrying the user a dependent task runs for.
pub const WORKER_DATA_USER_ID: &str = "UserId";

pub const PREFERENCE_NOTIFICATIONS_ENABLE: &str = "preference_notifications_enable";
pub const PREFERENCE_AUTOMUTE_ENABLE: &str = "preference_automute_enable";
