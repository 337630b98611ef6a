use anyhow::Result;
use dotenvy::dotenv;
use log::{info, warn};
use std::sync::Arc;

use classbell::core::{Config, PasswordCipher};
use classbell::database::Database;
use classbell::features::{
    spawn_calendar_jobs, BellScheduleCache, CourseCache, NotificationScheduler, RequestQueue,
    RequestWorker, SystemClock, TimeProvider,
};
use classbell::messaging::{LogSender, MessageSender};
use classbell::{Clock, CourseProvider, SuperClassClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    info!("Starting the class reminder bot...");

    let database = Database::open(&config.database_path)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.utc_offset_hours)?);
    let time = Arc::new(TimeProvider::new(clock, database.clone()));
    let bells = Arc::new(BellScheduleCache::new(database.clone(), Arc::clone(&time)));
    let courses = Arc::new(CourseCache::new(database.clone(), Arc::clone(&time)));

    let sender: Arc<dyn MessageSender> = Arc::new(LogSender);
    let provider: Arc<dyn CourseProvider> =
        Arc::new(SuperClassClient::new(&config.provider_base_url));
    let cipher = PasswordCipher::new(&config.secret_key);

    let scheduler = NotificationScheduler::new(
        database.clone(),
        Arc::clone(&time),
        Arc::clone(&bells),
        Arc::clone(&courses),
        Arc::clone(&sender),
        config.default_lead_minutes,
    );

    // Week counters must exist before any reminder is placed.
    if let Err(e) = time.recompute_weeks() {
        warn!("Initial week computation failed: {e}");
    }
    scheduler.redistribute_all().await;
    info!("{} reminder jobs armed on startup.", scheduler.armed_count());

    // The single mutation worker: every login, sync and edit goes through it.
    let (queue, queue_rx) = RequestQueue::new(config.request_queue_capacity);
    let worker = RequestWorker::new(
        database,
        provider,
        cipher,
        Arc::clone(&time),
        bells,
        courses,
        scheduler.clone(),
        sender,
        queue.clone(),
        config.default_lead_minutes,
    );
    tokio::spawn(worker.run(queue_rx));

    // Midnight redistribution and the Monday week rollover.
    spawn_calendar_jobs(Arc::clone(&time), scheduler.clone());

    info!("Bot configured successfully. Waiting for requests...");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down.");
    Ok(())
}
