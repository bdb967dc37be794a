//! Network-gated upload of locally captured media
//!
//! Nothing is transferred unless the network observer reports a definitive
//! connection, a trusted SSID is configured, and the two match. Every other
//! combination either asks the caller to retry later or fails terminally.

use crate::catalog::CatalogStore;
use crate::dedup::{HashGate, hash_file};
use crate::drive::DriveClient;
use crate::models::{SourceDescriptor, UploadRecord};
use crate::network::{NetworkObserver, NetworkState};
use crate::storage::discover_media;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Why an upload should be attempted again later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// No definitive network state arrived in time
    NetworkUnknown,
    NotConnected,
    UntrustedNetwork(String),
}

/// Why an upload will not succeed by retrying as is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    NoTrustedNetwork,
    Unauthorized(String),
    Transfer(String),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::NetworkUnknown => f.write_str("network state unknown"),
            RetryReason::NotConnected => f.write_str("not connected"),
            RetryReason::UntrustedNetwork(ssid) => write!(f, "untrusted network `{}`", ssid),
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::NoTrustedNetwork => f.write_str("no trusted network configured"),
            TerminalReason::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            TerminalReason::Transfer(msg) => write!(f, "transfer failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Uploaded { remote_id: String },
    Retry(RetryReason),
    Terminal(TerminalReason),
}

/// A local file not yet on the drive
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCandidate {
    pub path: PathBuf,
    pub descriptor: SourceDescriptor,
    pub content_hash: String,
}

/// How an upload run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    /// Stopped early; the whole run should be retried later
    Retry(RetryReason),
    /// Stopped early on a condition every remaining item would hit
    Halted(TerminalReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRun {
    pub uploaded: usize,
    pub failed: usize,
    /// Candidates not attempted because the run stopped early
    pub pending: usize,
    pub status: RunStatus,
}

pub struct Uploader<S> {
    store: Arc<S>,
    drive: Arc<dyn DriveClient>,
    observer: Arc<dyn NetworkObserver>,
    trusted_ssid: Option<String>,
    network_wait: Duration,
}

impl<S> Clone for Uploader<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            drive: self.drive.clone(),
            observer: self.observer.clone(),
            trusted_ssid: self.trusted_ssid.clone(),
            network_wait: self.network_wait,
        }
    }
}

impl<S: CatalogStore> Uploader<S> {
    pub fn new(
        store: Arc<S>,
        drive: Arc<dyn DriveClient>,
        observer: Arc<dyn NetworkObserver>,
        trusted_ssid: Option<String>,
        network_wait: Duration,
    ) -> Self {
        Self {
            store,
            drive,
            observer,
            trusted_ssid,
            network_wait,
        }
    }

    /// Gate on the network, then transfer and record one candidate
    pub async fn upload(&self, candidate: &UploadCandidate) -> UploadResult {
        if let Err(blocked) = self.network_gate().await {
            return blocked;
        }

        let remote_id = match self.drive.upload(&candidate.descriptor, &candidate.path).await {
            Ok(remote_id) => remote_id,
            Err(e) if e.is_unauthorized() => {
                error!("Drive credentials rejected, re-authorize the uploader: {}", e);
                return UploadResult::Terminal(TerminalReason::Unauthorized(e.to_string()));
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", candidate.descriptor.name, e);
                return UploadResult::Terminal(TerminalReason::Transfer(e.to_string()));
            }
        };

        let record = UploadRecord {
            content_hash: candidate.content_hash.clone(),
            name: candidate.descriptor.name.clone(),
            local_path: candidate.path.clone(),
            remote_id: remote_id.clone(),
        };
        if let Err(e) = self.store.mark_uploaded(&record).await {
            error!(
                "Uploaded {} as {} but could not record it: {}",
                record.name, remote_id, e
            );
            return UploadResult::Terminal(TerminalReason::Transfer(e.to_string()));
        }

        info!("Uploaded {} as {}", record.name, remote_id);
        UploadResult::Uploaded { remote_id }
    }

    async fn network_gate(&self) -> Result<(), UploadResult> {
        let mut states = self.observer.observe().await;

        let state = match timeout(self.network_wait, states.wait_for(NetworkState::is_definitive)).await {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) | Err(_) => {
                return Err(UploadResult::Retry(RetryReason::NetworkUnknown));
            }
        };

        match state {
            NetworkState::Found(ssid) => match self.trusted_ssid.as_deref() {
                None => Err(UploadResult::Terminal(TerminalReason::NoTrustedNetwork)),
                Some(trusted) if trusted == ssid => Ok(()),
                Some(_) => Err(UploadResult::Retry(RetryReason::UntrustedNetwork(ssid))),
            },
            NetworkState::NotConnected => Err(UploadResult::Retry(RetryReason::NotConnected)),
            NetworkState::Idle | NetworkState::Observing => {
                Err(UploadResult::Retry(RetryReason::NetworkUnknown))
            }
        }
    }

    /// Files below `capture_root` whose content has not been uploaded yet.
    ///
    /// Byte-identical files are offered once, whatever their names.
    pub async fn candidates(&self, capture_root: &Path) -> Result<Vec<UploadCandidate>> {
        let files = discover_media(capture_root)
            .await
            .with_context(|| format!("failed to scan {}", capture_root.display()))?;
        let uploaded = HashGate::load(self.store.as_ref())
            .await
            .context("failed to load uploaded hashes")?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for path in files {
            let content_hash = match hash_file(&path).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", path.display(), e);
                    continue;
                }
            };
            if uploaded.is_uploaded(&content_hash) || !seen.insert(content_hash.clone()) {
                continue;
            }

            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or_default();
            candidates.push(UploadCandidate {
                descriptor: SourceDescriptor::local(&path, size),
                path,
                content_hash,
            });
        }

        info!("Found {} files pending upload", candidates.len());
        Ok(candidates)
    }

    /// Upload every pending candidate once
    pub async fn run(&self, capture_root: &Path) -> Result<UploadRun> {
        let candidates = self.candidates(capture_root).await?;
        let total = candidates.len();
        let mut run = UploadRun {
            uploaded: 0,
            failed: 0,
            pending: 0,
            status: RunStatus::Complete,
        };

        for (index, candidate) in candidates.iter().enumerate() {
            match self.upload(candidate).await {
                UploadResult::Uploaded { .. } => run.uploaded += 1,
                UploadResult::Retry(reason) => {
                    info!("Upload paused: {}", reason);
                    run.pending = total - index;
                    run.status = RunStatus::Retry(reason);
                    break;
                }
                UploadResult::Terminal(TerminalReason::NoTrustedNetwork) => {
                    warn!("Uploads disabled: {}", TerminalReason::NoTrustedNetwork);
                    run.pending = total - index;
                    run.status = RunStatus::Halted(TerminalReason::NoTrustedNetwork);
                    break;
                }
                UploadResult::Terminal(reason) => {
                    warn!("Giving up on {}: {}", candidate.descriptor.name, reason);
                    run.failed += 1;
                }
            }
        }

        info!(
            uploaded = run.uploaded,
            failed = run.failed,
            pending = run.pending,
            "Upload run finished"
        );
        Ok(run)
    }

    /// `run`, repeated with exponential backoff (1s, 2s, 4s, ...) while the
    /// gate asks for a retry
    pub async fn run_with_backoff(&self, capture_root: &Path, max_attempts: u32) -> Result<UploadRun> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let run = self.run(capture_root).await?;
            if !matches!(run.status, RunStatus::Retry(_)) || attempt >= max_attempts {
                return Ok(run);
            }

            let delay = backoff_delay(attempt);
            info!(
                "Retrying upload run in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                max_attempts
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Delay before the attempt following `attempt`, doubling up to an hour
fn backoff_delay(attempt: u32) -> Duration {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map(Duration::from_secs)
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}
