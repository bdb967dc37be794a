use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "webp", "tif", "tiff", "dng",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "3gp", "mkv", "avi", "webm"];

/// Logical kind of a media file, derived from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Photo)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Catalog table holding items of this kind
    pub fn table(self) -> &'static str {
        match self {
            MediaKind::Photo => "photos",
            MediaKind::Video => "videos",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => f.write_str("photo"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Best-effort MIME type for a supported media path
pub fn mime_type_for(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "dng" => "image/x-adobe-dng",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "3gp" => "video/3gpp",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

/// Provenance of a file about to be processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Drive file id; `None` for purely local files
    pub external_id: Option<String>,
}

impl SourceDescriptor {
    /// Describe a local file from its path and size
    pub fn local(path: &Path, size: u64) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime_type: mime_type_for(path),
            size,
            external_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoDetails {
    pub aperture: Option<f64>,
    pub shutter_speed: Option<String>,
    pub iso: Option<i32>,
    pub focal_length: Option<f64>,
    pub white_balance: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub orientation: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub device_make: Option<String>,
    pub device_model: Option<String>,
    pub location_name: Option<String>,
}

impl PhotoDetails {
    /// GPS coordinates, ignoring the (0, 0) placeholder some cameras write
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if !(lat == 0.0 && lon == 0.0) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub duration: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub frame_rate: Option<f64>,
    pub video_codec: Option<String>,
    pub video_bitrate: Option<i64>,
    pub audio_codec: Option<String>,
    pub audio_bitrate: Option<i64>,
    pub audio_channels: Option<i32>,
    pub audio_sample_rate: Option<i32>,
    #[serde(skip)]
    pub thumbnail: Option<Vec<u8>>,
    pub thumbnail_mime_type: Option<String>,
}

/// Kind-specific part of a media item; exactly one variant is populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaDetails {
    Photo(PhotoDetails),
    Video(VideoDetails),
}

/// The canonical processed unit persisted in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub name: String,
    pub path: PathBuf,
    pub mime_type: String,
    pub size: u64,
    pub external_id: Option<String>,
    captured_at: Option<DateTime<Local>>,
    pub details: MediaDetails,
}

impl MediaItem {
    pub fn new(
        source: &SourceDescriptor,
        path: PathBuf,
        captured_at: Option<DateTime<Local>>,
        details: MediaDetails,
    ) -> Self {
        Self {
            name: source.name.clone(),
            path,
            mime_type: source.mime_type.clone(),
            size: source.size,
            external_id: source.external_id.clone(),
            captured_at,
            details,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.details {
            MediaDetails::Photo(_) => MediaKind::Photo,
            MediaDetails::Video(_) => MediaKind::Video,
        }
    }

    pub fn captured_at(&self) -> Option<DateTime<Local>> {
        self.captured_at
    }

    /// Fill the capture time if it is still unresolved.
    ///
    /// A resolved capture time is never overwritten.
    pub fn resolve_captured_at(&mut self, resolve: impl FnOnce() -> DateTime<Local>) -> DateTime<Local> {
        *self.captured_at.get_or_insert_with(resolve)
    }
}

/// Source path paired with its destination on the external backup drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl BackupPlan {
    /// Mirror `source` (under `local_root`) below `external_root`.
    ///
    /// Returns `None` when `source` does not live under `local_root`.
    pub fn new(source: &Path, local_root: &Path, external_root: &Path) -> Option<Self> {
        let relative = source.strip_prefix(local_root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(Self {
            source: source.to_path_buf(),
            destination: external_root.join(relative),
        })
    }
}

/// Result of processing one item in a batch
#[derive(Debug)]
pub enum ItemOutcome {
    /// Item persisted; carries where the file now lives
    Success(PathBuf),
    /// Not an error: already processed, unsupported or missing
    Skip(String),
    Failure(anyhow::Error),
}

/// Record stored once a local file reached the drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub content_hash: String,
    pub name: String,
    pub local_path: PathBuf,
    pub remote_id: String,
}
