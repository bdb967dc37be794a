//! Bounded execution of external media tools
//!
//! All probe and frame-extraction subprocesses go through one [`ToolRunner`].
//! Its semaphore caps subprocess fan-out independently of the batch limit.

use crate::error::ToolError;
use std::ffi::OsStr;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ToolRunner {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `program` to completion and return its output on exit code 0.
    ///
    /// The child is killed if the caller is cancelled or the timeout fires.
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<Output, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ToolError::Closed)?;

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        debug!(program, "running external tool");

        let output = match timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| ToolError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .last()
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Ok(output)
    }
}
