use anyhow::Result;
use common::database::{DatabaseConfig, init_pool, run_migrations};
use common::settings::Settings;
use media::database::{MIGRATOR, PgCatalog};
use media::drive::GoogleDrive;
use media::network::WifiObserver;
use media::tools::ToolRunner;
use media::uploader::Uploader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SSID_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting upload service");

    let settings = Settings::load()?;
    settings.validate()?;
    if settings.trusted_ssid().is_none() {
        warn!("No trusted SSID configured, uploads will not run until one is set");
    }

    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    run_migrations(&pool, &MIGRATOR).await?;

    let drive = GoogleDrive::from_credentials_file(
        &settings.credentials_path,
        settings.drive_folder_id.clone(),
    )
    .await?;
    let observer = WifiObserver::new(
        ToolRunner::new(1, Duration::from_secs(settings.network_wait_secs.max(1))),
        settings.ssid_program.clone(),
        SSID_POLL_INTERVAL,
    );

    let uploader = Uploader::new(
        Arc::new(PgCatalog::new(pool)),
        Arc::new(drive),
        Arc::new(observer),
        settings.trusted_ssid().map(str::to_string),
        Duration::from_secs(settings.network_wait_secs),
    );

    // `--once` runs a single manual upload pass instead of the schedule
    if std::env::args().skip(1).any(|arg| arg == "--once") {
        uploader
            .run_with_backoff(&settings.capture_root, settings.upload_max_attempts)
            .await?;
        return Ok(());
    }

    let mut scheduler = JobScheduler::new().await?;
    let running = Arc::new(Mutex::new(()));
    let schedule = settings.upload_schedule.clone();

    let job = Job::new_async(schedule.as_str(), move |_, _| {
        let uploader = uploader.clone();
        let settings = settings.clone();
        let running = running.clone();
        Box::pin(async move {
            // Skip the tick while a previous run is still backing off
            let Ok(_guard) = running.try_lock() else {
                info!("Previous upload run still in progress");
                return;
            };

            info!("Upload job executed");
            if let Err(e) = uploader
                .run_with_backoff(&settings.capture_root, settings.upload_max_attempts)
                .await
            {
                error!("Upload run failed: {:#}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("Started upload scheduler with schedule: {}", schedule);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down upload service");
    scheduler.shutdown().await?;

    Ok(())
}
