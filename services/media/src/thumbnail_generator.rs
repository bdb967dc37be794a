use crate::error::ToolError;
use crate::tools::ToolRunner;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

pub const THUMBNAIL_MIME_TYPE: &str = "image/jpeg";

/// Grabs a single JPEG frame one second into a video
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    tools: ToolRunner,
    program: String,
    scratch_dir: PathBuf,
}

impl ThumbnailGenerator {
    pub fn new(tools: ToolRunner, program: String) -> Self {
        Self {
            tools,
            program,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_scratch_dir(mut self, scratch_dir: PathBuf) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }

    /// JPEG bytes of the frame at 1s, or `None` if extraction failed.
    ///
    /// Failures are logged and never fail the caller.
    pub async fn generate_thumbnail(&self, video_path: &Path) -> Option<Vec<u8>> {
        let thumbnail_path = self.scratch_dir.join(format!("{}.jpg", Uuid::new_v4()));

        let result = self.extract_frame(video_path, &thumbnail_path).await;
        let bytes = match result {
            Ok(()) => match tokio::fs::read(&thumbnail_path).await {
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => {
                    warn!("Thumbnail skipped for {}: empty frame", video_path.display());
                    None
                }
                // ffmpeg exits cleanly without a frame when the clip is shorter than the seek
                Err(e) => {
                    warn!("Thumbnail skipped for {}: no frame written ({})", video_path.display(), e);
                    None
                }
            },
            Err(e) => {
                self.log_failure(video_path, &e);
                None
            }
        };

        // Clean up temporary files
        let _ = tokio::fs::remove_file(&thumbnail_path).await;

        if bytes.is_some() {
            info!("Generated thumbnail for video: {}", video_path.display());
        }
        bytes
    }

    async fn extract_frame(&self, video_path: &Path, thumbnail_path: &Path) -> Result<(), ToolError> {
        let args = [
            OsStr::new("-y"),
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-ss"),
            OsStr::new("00:00:01"),
            OsStr::new("-i"),
            video_path.as_os_str(),
            OsStr::new("-frames:v"),
            OsStr::new("1"),
            OsStr::new("-f"),
            OsStr::new("image2"),
            thumbnail_path.as_os_str(),
        ];
        self.tools.run(&self.program, args).await?;
        Ok(())
    }

    fn log_failure(&self, video_path: &Path, err: &ToolError) {
        if err.is_missing_program() {
            warn!(
                "Thumbnail skipped for {}: `{}` is not installed ({})",
                video_path.display(),
                self.program,
                install_hint()
            );
        } else {
            warn!("Thumbnail skipped for {}: {}", video_path.display(), err);
        }
    }
}

fn install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "install it with `brew install ffmpeg`"
    } else if cfg!(target_os = "windows") {
        "install it with `winget install ffmpeg` and make sure it is on PATH"
    } else {
        "install it with your package manager, e.g. `sudo apt install ffmpeg`"
    }
}
