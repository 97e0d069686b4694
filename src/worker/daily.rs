use async_trait::async_trait;
use std::sync::Arc;
use crate::config::PreferenceDefaults;
use crate::errors::{FetchError, WorkerError, WorkerResult};
use crate::models::{TaskKind, TaskRequest, User};
use crate::services::{PreferenceStore, TaskQueue, TimetableFetcher, UserRegistry};
use super::runner::TaskHandler;
use super::schedule::DailyScheduler;
use super::{
    PREFERENCE_AUTOMUTE_ENABLE, PREFERENCE_NOTIFICATIONS_ENABLE, TAG_AUTO_MUTE_SETUP_WORK,
    TAG_NOTIFICATION_SETUP_WORK, WORKER_DATA_USER_ID,
};

/// What happened to a single user during a daily run.
#[derive(Debug)]
pub enum UserRefreshOutcome {
    Refreshed { enqueued: Vec<TaskKind> },
    /// Anonymous or unconfigured account without a personal timetable.
    SkippedNoData,
    FetchFailed(FetchError),
}

#[derive(Debug)]
pub struct RunReport {
    pub refreshed: usize,
    pub skipped: usize,
    pub dependents_enqueued: usize,
    pub next_run: TaskRequest,
}

/// Caches every user's personal timetable once a day and starts the workers
/// that depend on that cache.
pub struct DailyWorker {
    users: Arc<dyn UserRegistry>,
    timetables: Arc<dyn TimetableFetcher>,
    preferences: Arc<dyn PreferenceStore>,
    queue: Arc<dyn TaskQueue>,
    scheduler: DailyScheduler,
    defaults: PreferenceDefaults,
}

impl DailyWorker {
    pub fn new(
        users: Arc<dyn UserRegistry>,
        timetables: Arc<dyn TimetableFetcher>,
        preferences: Arc<dyn PreferenceStore>,
        queue: Arc<dyn TaskQueue>,
        scheduler: DailyScheduler,
        defaults: PreferenceDefaults,
    ) -> Self {
        Self {
            users,
            timetables,
            preferences,
            queue,
            scheduler,
            defaults,
        }
    }

    /// Refreshes one user. Fetch failures are reported as an outcome; store
    /// and queue failures are returned as errors.
    pub async fn refresh_user(&self, user: &User) -> WorkerResult<UserRefreshOutcome> {
        let Some(element) = user.personal_timetable else {
            tracing::debug!(user_id = user.id, "No personal timetable, skipping user");
            return Ok(UserRefreshOutcome::SkippedNoData);
        };

        if let Err(e) = self.timetables.load_timetable(user, &element).await {
            return Ok(UserRefreshOutcome::FetchFailed(e));
        }

        let notifications_enable = self
            .preferences
            .read_bool(user.id, PREFERENCE_NOTIFICATIONS_ENABLE, self.defaults.notifications_enable_default)
            .await?;
        let automute_enable = self
            .preferences
            .read_bool(user.id, PREFERENCE_AUTOMUTE_ENABLE, self.defaults.automute_enable_default)
            .await?;

        let mut enqueued = Vec::new();
        if notifications_enable {
            self.enqueue_dependent(user, TaskKind::NotificationSetup, TAG_NOTIFICATION_SETUP_WORK)
                .await?;
            enqueued.push(TaskKind::NotificationSetup);
        }
        if automute_enable {
            self.enqueue_dependent(user, TaskKind::AutoMuteSetup, TAG_AUTO_MUTE_SETUP_WORK)
                .await?;
            enqueued.push(TaskKind::AutoMuteSetup);
        }

        Ok(UserRefreshOutcome::Refreshed { enqueued })
    }

    async fn enqueue_dependent(&self, user: &User, kind: TaskKind, tag: &str) -> WorkerResult<()> {
        let request = TaskRequest::new(kind)
            .add_tag(tag)
            .with_input(WORKER_DATA_USER_ID, user.id);
        self.queue.enqueue(&request).await?;

        tracing::debug!(user_id = user.id, task_id = %request.task_id, %kind, "Dependent task queued");
        Ok(())
    }

    /// One full run: every user in registry order, then the successor.
    /// The first failed fetch ends the run without scheduling a successor.
    pub async fn do_work(&self) -> WorkerResult<RunReport> {
        let users = self.users.list_users().await?;
        tracing::info!(users = users.len(), "Daily refresh started");

        let mut refreshed = 0;
        let mut skipped = 0;
        let mut dependents_enqueued = 0;

        for user in &users {
            match self.refresh_user(user).await? {
                UserRefreshOutcome::Refreshed { enqueued } => {
                    refreshed += 1;
                    dependents_enqueued += enqueued.len();
                }
                UserRefreshOutcome::SkippedNoData => skipped += 1,
                UserRefreshOutcome::FetchFailed(source) => {
                    tracing::error!(
                        user_id = user.id,
                        profile = %user.profile_name,
                        error = %source,
                        "Timetable loading error"
                    );
                    return Err(WorkerError::Fetch {
                        user_id: user.id,
                        source,
                    });
                }
            }
        }

        let next_run = self.scheduler.schedule_next().await?;

        Ok(RunReport {
            refreshed,
            skipped,
            dependents_enqueued,
            next_run,
        })
    }
}

#[async_trait]
impl TaskHandler for DailyWorker {
    async fn handle(&self, _task: &TaskRequest) -> WorkerResult<()> {
        let report = self.do_work().await?;
        tracing::info!(
            refreshed = report.refreshed,
            skipped = report.skipped,
            dependents_enqueued = report.dependents_enqueued,
            next_due = %report.next_run.due_time,
            "Daily refresh finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::schedule::DEFAULT_DAILY_HOUR;
    use crate::worker::testing::{user, FakeFetcher, MemoryPreferences, MemoryQueue, MemoryUsers};
    use crate::worker::TAG_DAILY_WORK;

    struct Fixture {
        fetcher: Arc<FakeFetcher>,
        queue: Arc<MemoryQueue>,
        worker: DailyWorker,
    }

    fn fixture(users: Vec<User>, fetcher: FakeFetcher, preferences: MemoryPreferences) -> Fixture {
        let fetcher = Arc::new(fetcher);
        let queue = Arc::new(MemoryQueue::default());
        let scheduler = DailyScheduler::new(queue.clone(), DEFAULT_DAILY_HOUR).unwrap();
        let worker = DailyWorker::new(
            Arc::new(MemoryUsers::new(users)),
            fetcher.clone(),
            Arc::new(preferences),
            queue.clone(),
            scheduler,
            PreferenceDefaults::default(),
        );
        Fixture { fetcher, queue, worker }
    }

    fn both_enabled(user_id: i64) -> MemoryPreferences {
        MemoryPreferences::default()
            .with(user_id, PREFERENCE_NOTIFICATIONS_ENABLE, true)
            .with(user_id, PREFERENCE_AUTOMUTE_ENABLE, true)
    }

    #[tokio::test]
    async fn user_without_personal_timetable_is_skipped() {
        let f = fixture(vec![user(1, None)], FakeFetcher::default(), both_enabled(1));

        let outcome = f.worker.refresh_user(&user(1, None)).await.unwrap();

        assert!(matches!(outcome, UserRefreshOutcome::SkippedNoData));
        assert!(f.fetcher.calls().is_empty());
        assert!(f.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn both_preferences_enabled_queue_two_dependents_for_the_user() {
        let f = fixture(vec![user(7, Some(70))], FakeFetcher::default(), both_enabled(7));

        let outcome = f.worker.refresh_user(&user(7, Some(70))).await.unwrap();

        match outcome {
            UserRefreshOutcome::Refreshed { enqueued } => {
                assert_eq!(enqueued, vec![TaskKind::NotificationSetup, TaskKind::AutoMuteSetup]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let pending = f.queue.pending();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|t| t.input_value(WORKER_DATA_USER_ID) == Some("7")));
        assert_eq!(f.queue.pending_with_tag(TAG_NOTIFICATION_SETUP_WORK).len(), 1);
        assert_eq!(f.queue.pending_with_tag(TAG_AUTO_MUTE_SETUP_WORK).len(), 1);
    }

    #[tokio::test]
    async fn disabled_preferences_queue_nothing() {
        let preferences = MemoryPreferences::default()
            .with(7, PREFERENCE_NOTIFICATIONS_ENABLE, false)
            .with(7, PREFERENCE_AUTOMUTE_ENABLE, false);
        let f = fixture(vec![user(7, Some(70))], FakeFetcher::default(), preferences);

        let outcome = f.worker.refresh_user(&user(7, Some(70))).await.unwrap();

        assert!(matches!(outcome, UserRefreshOutcome::Refreshed { ref enqueued } if enqueued.is_empty()));
        assert_eq!(f.fetcher.calls(), vec![7]);
        assert!(f.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn only_enabled_dependent_is_queued() {
        let preferences = MemoryPreferences::default().with(7, PREFERENCE_AUTOMUTE_ENABLE, true);
        let f = fixture(vec![user(7, Some(70))], FakeFetcher::default(), preferences);

        f.worker.refresh_user(&user(7, Some(70))).await.unwrap();

        let pending = f.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, TaskKind::AutoMuteSetup);
    }

    #[tokio::test]
    async fn first_failure_aborts_the_run_without_successor() {
        let users = vec![user(1, Some(10)), user(2, Some(20))];
        let f = fixture(users, FakeFetcher::failing_for(&[1]), both_enabled(2));

        let err = f.worker.do_work().await.unwrap_err();

        assert!(matches!(err, WorkerError::Fetch { user_id: 1, source: FetchError::Permission(_) }));
        assert_eq!(f.fetcher.calls(), vec![1]);
        assert!(f.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn failure_after_a_success_keeps_earlier_dependents() {
        let users = vec![user(1, Some(10)), user(2, Some(20)), user(3, Some(30))];
        let f = fixture(users, FakeFetcher::failing_for(&[2]), both_enabled(1));

        assert!(f.worker.do_work().await.is_err());

        assert_eq!(f.fetcher.calls(), vec![1, 2]);
        assert_eq!(f.queue.pending().len(), 2);
        assert!(f.queue.pending_with_tag(TAG_DAILY_WORK).is_empty());
    }

    #[tokio::test]
    async fn successful_run_schedules_exactly_one_successor() {
        let users = vec![user(1, None), user(2, Some(20)), user(3, Some(30))];
        let f = fixture(users, FakeFetcher::default(), both_enabled(3));

        let report = f.worker.do_work().await.unwrap();

        assert_eq!(report.refreshed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dependents_enqueued, 2);
        assert_eq!(f.fetcher.calls(), vec![2, 3]);

        let successors = f.queue.pending_with_tag(TAG_DAILY_WORK);
        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].task_id, report.next_run.task_id);
        assert_eq!(successors[0].kind, TaskKind::DailyRefresh);
        assert!(successors[0].due_time >= successors[0].created_at);
    }

    #[tokio::test]
    async fn run_with_no_users_still_reschedules() {
        let f = fixture(Vec::new(), FakeFetcher::default(), MemoryPreferences::default());

        let report = f.worker.do_work().await.unwrap();

        assert_eq!(report.refreshed, 0);
        assert_eq!(f.queue.pending_with_tag(TAG_DAILY_WORK).len(), 1);
    }
}
