//! Error types for the media pipeline

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Failure of an external media tool (probe or frame extraction)
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program could not be started at all
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran past its time budget and was killed
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// The program exited unsuccessfully
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The tool limiter was shut down
    #[error("tool limiter closed")]
    Closed,
}

impl ToolError {
    /// True when the program is not installed on this host
    pub fn is_missing_program(&self) -> bool {
        matches!(self, ToolError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Metadata could not be derived from a media file
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported media file: {0}")]
    Unsupported(PathBuf),

    #[error("failed to decode image metadata of {path}: {reason}")]
    Exif { path: PathBuf, reason: String },

    #[error("media probe failed: {0}")]
    Probe(#[from] ToolError),

    #[error("malformed probe output: {0}")]
    ProbeOutput(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure talking to the cloud drive
#[derive(Error, Debug)]
pub enum DriveError {
    /// Credentials rejected (HTTP 401/403); retrying will not help
    #[error("drive rejected credentials: {0}")]
    Unauthorized(String),

    /// The drive answered with another error status
    #[error("drive request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("drive transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("drive response missing {0}")]
    MalformedResponse(&'static str),

    #[error("failed to read drive credentials: {0}")]
    Credentials(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DriveError::Unauthorized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_detection() {
        let err = ToolError::Spawn {
            program: "ffprobe".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_missing_program());

        let err = ToolError::Timeout {
            program: "ffprobe".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(!err.is_missing_program());
    }

    #[test]
    fn test_drive_error_display() {
        let err = DriveError::Http {
            status: 503,
            message: "backend unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "drive request failed with status 503: backend unavailable"
        );
        assert!(DriveError::Unauthorized("expired".to_string()).is_unauthorized());
    }
}
