mod models;
mod services;
mod worker;
mod config;
mod errors;

use std::sync::Arc;
use anyhow::Context;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use crate::{
    config::Config,
    errors::AppResult,
    services::{RedisService, TaskQueue, TimetableLoader},
    worker::{
        AutoMuteSetupWorker, DailyScheduler, DailyWorker, Handlers, NotificationSetupWorker,
        TaskRunner,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    run(config).await.context("Timetable sync service failed")
}

async fn run(config: Config) -> AppResult<()> {
    // Initialize Redis client
    let redis_client = if config.redis.sentinel_enabled {
        let sentinel_url = config.redis.sentinel_url.clone().ok_or_else(|| {
            ::config::ConfigError::Message("redis.sentinel_url is required when sentinel is enabled".into())
        })?;
        Arc::new(redis::Client::open(sentinel_url)?)
    } else {
        Arc::new(redis::Client::open(config.redis.url.as_str())?)
    };

    let store = Arc::new(RedisService::new(redis_client));
    let queue: Arc<dyn TaskQueue> = store.clone();
    let loader = Arc::new(TimetableLoader::new(&config.timetable, store.clone())?);
    let scheduler = DailyScheduler::new(queue.clone(), config.schedule.daily_hour)?;

    let daily = DailyWorker::new(
        store.clone(),
        loader,
        store.clone(),
        queue.clone(),
        scheduler.clone(),
        config.preferences.clone(),
    );
    let handlers = Handlers::new(
        Arc::new(daily),
        Arc::new(NotificationSetupWorker::new(store.clone(), store.clone())),
        Arc::new(AutoMuteSetupWorker::new(store.clone(), store.clone())),
    );

    // Every process start either refreshes right away or re-arms the daily chain.
    if config.schedule.run_on_startup {
        scheduler.enqueue_immediate().await?;
    } else {
        scheduler.schedule_next().await?;
    }
    tracing::info!(daily_hour = scheduler.hour(), "Daily refresh armed");

    let semaphore = Arc::new(Semaphore::new(config.worker.max_concurrent_tasks));
    let shutdown = CancellationToken::new();
    let runner = TaskRunner::new(queue, handlers, scheduler, &config.worker);

    // Initialize worker pool
    let mut workers = Vec::with_capacity(config.worker.worker_count);
    for _ in 0..config.worker.worker_count {
        workers.push(tokio::spawn(worker::worker_process(
            runner.clone(),
            semaphore.clone(),
            shutdown.clone(),
        )));
    }
    tracing::info!(workers = workers.len(), "Timetable sync running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
    shutdown.cancel();

    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!("Worker ended abnormally: {}", e);
        }
    }
    Ok(())
}
