//! Observation of the current network identity
//!
//! Observers publish [`NetworkState`] through a `watch` channel. The upload
//! gate waits, with a bound, for a definitive state.

use crate::tools::ToolRunner;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkState {
    Idle,
    Observing,
    Found(String),
    NotConnected,
}

impl NetworkState {
    pub fn is_definitive(&self) -> bool {
        matches!(self, NetworkState::Found(_) | NetworkState::NotConnected)
    }
}

#[async_trait]
pub trait NetworkObserver: Send + Sync {
    /// Start observing; the receiver sees every later state change
    async fn observe(&self) -> watch::Receiver<NetworkState>;
}

/// Polls a wireless tool (`iwgetid -r` by default) for the connected SSID
#[derive(Debug, Clone)]
pub struct WifiObserver {
    tools: ToolRunner,
    program: String,
    poll_interval: Duration,
}

impl WifiObserver {
    pub fn new(tools: ToolRunner, program: String, poll_interval: Duration) -> Self {
        Self {
            tools,
            program,
            poll_interval,
        }
    }

    async fn current_state(&self) -> NetworkState {
        match self.tools.run(&self.program, ["-r"]).await {
            Ok(output) => parse_ssid(&output.stdout),
            Err(e) if e.is_missing_program() => {
                warn!("Cannot observe network, `{}` is not installed", self.program);
                NetworkState::Idle
            }
            Err(e) => {
                debug!("No wireless connection: {}", e);
                NetworkState::NotConnected
            }
        }
    }
}

fn parse_ssid(stdout: &[u8]) -> NetworkState {
    let ssid = String::from_utf8_lossy(stdout).trim().to_string();
    if ssid.is_empty() {
        NetworkState::NotConnected
    } else {
        NetworkState::Found(ssid)
    }
}

#[async_trait]
impl NetworkObserver for WifiObserver {
    async fn observe(&self) -> watch::Receiver<NetworkState> {
        let (tx, rx) = watch::channel(NetworkState::Observing);
        let observer = self.clone();

        tokio::spawn(async move {
            loop {
                let state = observer.current_state().await;
                tx.send_if_modified(|current| {
                    if *current == state {
                        false
                    } else {
                        *current = state;
                        true
                    }
                });

                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(observer.poll_interval) => {}
                }
            }
            debug!("network observation stopped");
        });

        rx
    }
}
