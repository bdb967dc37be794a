use anyhow::Result;
use common::database::{DatabaseConfig, init_pool, run_migrations};
use common::settings::Settings;
use media::database::{MIGRATOR, PgCatalog};
use media::drive::{DriveClient, GoogleDrive};
use media::geocoder::NominatimGeocoder;
use media::importer::Importer;
use media::metadata_extractor::MetadataExtractor;
use media::report::BatchSummary;
use media::storage::LocalMover;
use media::thumbnail_generator::ThumbnailGenerator;
use media::tools::ToolRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type PipelineImporter = Importer<PgCatalog, MetadataExtractor>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting media ingestion service");

    // Configuration errors are fatal before any item is processed
    let settings = Settings::load()?;
    settings.validate()?;

    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    run_migrations(&pool, &MIGRATOR).await?;
    let catalog = Arc::new(PgCatalog::new(pool));

    let tools = ToolRunner::new(
        settings.tool_concurrency,
        Duration::from_secs(settings.tool_timeout_secs),
    );
    let thumbnails = ThumbnailGenerator::new(tools.clone(), settings.extract_program.clone());
    let geocoder = NominatimGeocoder::new(
        settings.geocoder_url.clone(),
        settings.geocoder_language.clone(),
    )?;
    let extractor = MetadataExtractor::new(
        Arc::new(Semaphore::new(settings.tool_concurrency)),
        tools,
        settings.probe_program.clone(),
        thumbnails,
    )
    .with_geocoder(Arc::new(geocoder));

    let importer = Importer::new(catalog, Arc::new(extractor), settings.batch_concurrency);

    let drive: Arc<dyn DriveClient> = Arc::new(
        GoogleDrive::from_credentials_file(&settings.credentials_path, settings.drive_folder_id.clone())
            .await?,
    );

    // Local media is cataloged (or backed up) once at startup
    let summary = match &settings.backup_root {
        Some(backup_root) => {
            importer
                .backup_directory(Arc::new(LocalMover), &settings.capture_root, backup_root)
                .await
        }
        None => importer.import_directory(&settings.capture_root).await,
    };
    match summary {
        Ok(summary) => write_failure_log(&settings, &summary).await,
        Err(e) => error!("Local import failed: {:#}", e),
    }

    let mut scheduler = start_drive_import(importer, drive, settings.clone()).await?;

    info!("Media ingestion service started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down media ingestion service");
    scheduler.shutdown().await?;

    Ok(())
}

async fn start_drive_import(
    importer: PipelineImporter,
    drive: Arc<dyn DriveClient>,
    settings: Settings,
) -> Result<JobScheduler> {
    let schedule = settings.import_schedule.clone();
    let scheduler = JobScheduler::new().await?;

    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(schedule.as_str(), move |_, _| {
        let importer = importer.clone();
        let drive = drive.clone();
        let settings = settings.clone();
        let running = running.clone();
        Box::pin(async move {
            // Overlapping batches would race on the same drive files
            let Ok(_guard) = running.try_lock() else {
                info!("Previous drive import still in progress");
                return;
            };

            info!("Drive import job executed");
            match importer
                .import_from_drive(drive, &settings.destination_root)
                .await
            {
                Ok(summary) => write_failure_log(&settings, &summary).await,
                Err(e) => error!("Drive import failed: {:#}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started drive import scheduler with schedule: {}", schedule);
    Ok(scheduler)
}

async fn write_failure_log(settings: &Settings, summary: &BatchSummary) {
    let Some(dir) = &settings.failure_log_dir else {
        return;
    };
    if let Err(e) = summary.write_failure_log(dir).await {
        error!("Failed to write failure log: {}", e);
    }
}
