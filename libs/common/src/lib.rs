//! Common library for the media sync workspace
//!
//! This crate provides shared functionality used by the ingestion and upload
//! services, including database connectivity, the catalog error type and the
//! environment-driven settings.

pub mod database;
pub mod error;
pub mod settings;

/// Example usage of the database and settings modules
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, init_pool, health_check};
/// use common::settings::Settings;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = Settings::load()?;
///     settings.validate()?;
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     let is_healthy = health_check(&pool).await?;
///     println!("Database health check: {} (batch of {})", is_healthy, settings.batch_concurrency);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
