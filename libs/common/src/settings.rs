//! Environment-driven settings shared by the ingestion and upload services
//!
//! Every key can be set through an environment variable prefixed with
//! `MEDIA_SYNC_`, e.g. `MEDIA_SYNC_BATCH_CONCURRENCY=8`.

use crate::error::SettingsError;
use config::{Config, Environment};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable prefix for every setting
pub const ENV_PREFIX: &str = "MEDIA_SYNC";

/// Runtime settings for the pipeline services
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory receiving drive downloads
    pub destination_root: PathBuf,
    /// Directory holding locally captured media (import and upload source)
    pub capture_root: PathBuf,
    /// External drive root for local backups
    pub backup_root: Option<PathBuf>,
    /// JSON file holding the drive bearer token
    pub credentials_path: PathBuf,
    /// Drive folder uploads are placed in
    pub drive_folder_id: Option<String>,
    /// Only network allowed to carry uploads
    pub trusted_ssid: Option<String>,
    /// Outer limit: items processed concurrently within one batch
    pub batch_concurrency: usize,
    /// Inner limit: concurrent external tool invocations
    pub tool_concurrency: usize,
    /// Upper bound for one external tool invocation
    pub tool_timeout_secs: u64,
    /// Bounded wait for a definitive network state
    pub network_wait_secs: u64,
    pub geocoder_url: String,
    pub geocoder_language: String,
    pub probe_program: String,
    pub extract_program: String,
    pub ssid_program: String,
    /// Cron schedule for drive imports
    pub import_schedule: String,
    /// Cron schedule for upload runs
    pub upload_schedule: String,
    /// Directory for failed-item logs; disabled when unset
    pub failure_log_dir: Option<PathBuf>,
    pub upload_max_attempts: u32,
}

impl Settings {
    /// Load settings from defaults overlaid with `MEDIA_SYNC_*` variables
    pub fn load() -> Result<Self, SettingsError> {
        let settings = Config::builder()
            .set_default("destination_root", "./media")?
            .set_default("capture_root", "./capture")?
            .set_default("credentials_path", "./credentials.json")?
            .set_default("batch_concurrency", 10)?
            .set_default("tool_concurrency", 4)?
            .set_default("tool_timeout_secs", 120)?
            .set_default("network_wait_secs", 5)?
            .set_default(
                "geocoder_url",
                "https://nominatim.openstreetmap.org/reverse",
            )?
            .set_default("geocoder_language", "en")?
            .set_default("probe_program", "ffprobe")?
            .set_default("extract_program", "ffmpeg")?
            .set_default("ssid_program", "iwgetid")?
            .set_default("import_schedule", "0 */15 * * * *")?
            .set_default("upload_schedule", "0 0 * * * *")?
            .set_default("upload_max_attempts", 5)?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.batch_concurrency == 0 {
            return Err(SettingsError::Invalid {
                key: "batch_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.tool_concurrency == 0 || self.tool_concurrency > self.batch_concurrency {
            return Err(SettingsError::Invalid {
                key: "tool_concurrency",
                reason: format!(
                    "must be between 1 and batch_concurrency ({})",
                    self.batch_concurrency
                ),
            });
        }

        if self.tool_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "tool_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        if !self.destination_root.is_dir() {
            return Err(SettingsError::Invalid {
                key: "destination_root",
                reason: format!("{} is not a directory", self.destination_root.display()),
            });
        }

        if self.upload_max_attempts == 0 {
            return Err(SettingsError::Invalid {
                key: "upload_max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// The trusted SSID, treating a blank value as unset
    pub fn trusted_ssid(&self) -> Option<&str> {
        self.trusted_ssid
            .as_deref()
            .map(str::trim)
            .filter(|ssid| !ssid.is_empty())
    }
}
