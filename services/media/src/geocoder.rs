//! Reverse geocoding of photo coordinates
//!
//! The public Nominatim service allows roughly one request per second per
//! client, so every lookup is paced through a shared gate.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

/// Minimum spacing between two lookups in this process
pub const MIN_INTERVAL: Duration = Duration::from_millis(1100);

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Human-readable place name; `None` when the lookup fails or finds nothing
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<String>;
}

/// Serializes calls so consecutive ones start at least `interval` apart
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for the next free slot and reserve the one after it
    pub async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            sleep_until(slot).await;
        }
        *next_slot = Some(Instant::now() + self.interval);
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    language: String,
    pacer: Pacer,
}

impl NominatimGeocoder {
    pub fn new(base_url: String, language: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("media-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            language,
            pacer: Pacer::new(MIN_INTERVAL),
        })
    }

    async fn lookup(&self, latitude: f64, longitude: f64) -> Result<Option<String>, reqwest::Error> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("accept-language", self.language.clone()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: NominatimResponse = response.json().await?;
        Ok(body.display_name)
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<String> {
        self.pacer.wait().await;

        match self.lookup(latitude, longitude).await {
            Ok(name) => {
                debug!(latitude, longitude, ?name, "reverse geocoded");
                name
            }
            Err(e) => {
                warn!(latitude, longitude, "reverse geocoding failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_calls() {
        let pacer = Pacer::new(MIN_INTERVAL);
        let start = Instant::now();

        pacer.wait().await;
        pacer.wait().await;
        pacer.wait().await;

        assert!(start.elapsed() >= MIN_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate() {
        let pacer = Pacer::new(MIN_INTERVAL);
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }
}
