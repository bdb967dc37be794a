use crate::capture_time;
use crate::error::{ExtractError, ToolError};
use crate::geocoder::ReverseGeocoder;
use crate::models::{MediaDetails, MediaItem, MediaKind, PhotoDetails, SourceDescriptor, VideoDetails};
use crate::thumbnail_generator::{THUMBNAIL_MIME_TYPE, ThumbnailGenerator};
use crate::tools::ToolRunner;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use exif::{Exif, Field, In, Tag, Value};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Builds a [`MediaItem`] from a file on disk
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, source: &SourceDescriptor, path: &Path) -> Result<MediaItem, ExtractError>;
}

pub struct MetadataExtractor {
    exif_permits: Arc<Semaphore>,
    tools: ToolRunner,
    probe_program: String,
    thumbnails: ThumbnailGenerator,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
}

impl MetadataExtractor {
    pub fn new(
        exif_permits: Arc<Semaphore>,
        tools: ToolRunner,
        probe_program: String,
        thumbnails: ThumbnailGenerator,
    ) -> Self {
        Self {
            exif_permits,
            tools,
            probe_program,
            thumbnails,
            geocoder: None,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    async fn extract_photo(
        &self,
        source: &SourceDescriptor,
        path: &Path,
    ) -> Result<MediaItem, ExtractError> {
        let (captured_at, mut details) = {
            let _permit = self
                .exif_permits
                .acquire()
                .await
                .map_err(|_| ExtractError::Probe(ToolError::Closed))?;
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || read_exif(&owned)).await??
        };

        self.locate(&mut details).await;

        Ok(MediaItem::new(
            source,
            path.to_path_buf(),
            captured_at,
            MediaDetails::Photo(details),
        ))
    }

    /// Fill the location name from GPS coordinates; failures leave it empty
    async fn locate(&self, details: &mut PhotoDetails) {
        let (Some(geocoder), Some((latitude, longitude))) = (&self.geocoder, details.coordinates())
        else {
            return;
        };
        details.location_name = geocoder.reverse_geocode(latitude, longitude).await;
    }

    async fn extract_video(
        &self,
        source: &SourceDescriptor,
        path: &Path,
    ) -> Result<MediaItem, ExtractError> {
        info!("Extracting metadata from file: {}", path.display());

        let args = [
            OsStr::new("-v"),
            OsStr::new("quiet"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            path.as_os_str(),
        ];
        let output = self.tools.run(&self.probe_program, args).await?;
        let ffprobe_data: serde_json::Value = serde_json::from_slice(&output.stdout)?;

        let (captured_at, mut details) = parse_ffprobe_output(&ffprobe_data);

        if let Some(thumbnail) = self.thumbnails.generate_thumbnail(path).await {
            details.thumbnail = Some(thumbnail);
            details.thumbnail_mime_type = Some(THUMBNAIL_MIME_TYPE.to_string());
        }

        Ok(MediaItem::new(
            source,
            path.to_path_buf(),
            captured_at,
            MediaDetails::Video(details),
        ))
    }
}

#[async_trait]
impl MediaExtractor for MetadataExtractor {
    async fn extract(&self, source: &SourceDescriptor, path: &Path) -> Result<MediaItem, ExtractError> {
        let kind =
            MediaKind::from_path(path).ok_or_else(|| ExtractError::Unsupported(path.to_path_buf()))?;

        let mut item = match kind {
            MediaKind::Photo => self.extract_photo(source, path).await,
            MediaKind::Video => self.extract_video(source, path).await,
        }
        .inspect_err(|e| warn!("Metadata extraction failed for {}: {}", source.name, e))?;

        if item.captured_at().is_none() {
            let modified: DateTime<Local> = tokio::fs::metadata(path).await?.modified()?.into();
            let resolved = capture_time::resolve(None, &source.name, path, modified);
            item.resolve_captured_at(|| resolved);
        }

        Ok(item)
    }
}

fn read_exif(path: &Path) -> Result<(Option<DateTime<Local>>, PhotoDetails), ExtractError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);

    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        // No EXIF block at all is common for screenshots and edits
        Err(exif::Error::NotFound(_)) => return Ok((None, PhotoDetails::default())),
        Err(e) => {
            return Err(ExtractError::Exif {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    Ok((exif_capture_time(&exif), photo_details(&exif)))
}

fn exif_capture_time(exif: &Exif) -> Option<DateTime<Local>> {
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
        .find_map(|field| match &field.value {
            Value::Ascii(values) => {
                let dt = exif::DateTime::from_ascii(values.first()?).ok()?;
                let naive = NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
                    .and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into())?;
                Local.from_local_datetime(&naive).earliest()
            }
            _ => None,
        })
}

fn photo_details(exif: &Exif) -> PhotoDetails {
    let field = |tag| exif.get_field(tag, In::PRIMARY);
    let uint = |tag| field(tag).and_then(|f| f.value.get_uint(0)).map(|v| v as i32);

    let altitude = field(Tag::GPSAltitude).and_then(rational).map(|altitude| {
        // Ref 1 means below sea level
        if field(Tag::GPSAltitudeRef).and_then(|f| f.value.get_uint(0)) == Some(1) {
            -altitude
        } else {
            altitude
        }
    });

    PhotoDetails {
        aperture: field(Tag::FNumber).and_then(rational),
        shutter_speed: field(Tag::ExposureTime).map(|f| f.display_value().to_string()),
        iso: uint(Tag::PhotographicSensitivity),
        focal_length: field(Tag::FocalLength).and_then(rational),
        white_balance: field(Tag::WhiteBalance).map(|f| f.display_value().to_string()),
        width: uint(Tag::PixelXDimension).or_else(|| uint(Tag::ImageWidth)),
        height: uint(Tag::PixelYDimension).or_else(|| uint(Tag::ImageLength)),
        orientation: uint(Tag::Orientation),
        latitude: gps_coordinate(field(Tag::GPSLatitude), field(Tag::GPSLatitudeRef), 'S'),
        longitude: gps_coordinate(field(Tag::GPSLongitude), field(Tag::GPSLongitudeRef), 'W'),
        altitude,
        device_make: field(Tag::Make).and_then(ascii),
        device_model: field(Tag::Model).and_then(ascii),
        location_name: None,
    }
}

fn rational(field: &Field) -> Option<f64> {
    match &field.value {
        Value::Rational(values) => values.first().map(|r| r.to_f64()),
        _ => None,
    }
}

fn ascii(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string()
            })
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// Degrees/minutes/seconds to signed decimal degrees
fn gps_coordinate(value: Option<&Field>, reference: Option<&Field>, negative: char) -> Option<f64> {
    let degrees = match &value?.value {
        Value::Rational(dms) if dms.len() >= 3 => {
            dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0
        }
        _ => return None,
    };

    let is_negative = reference
        .and_then(ascii)
        .is_some_and(|r| r.starts_with(negative));
    Some(if is_negative { -degrees } else { degrees })
}

fn parse_ffprobe_output(ffprobe_data: &serde_json::Value) -> (Option<DateTime<Local>>, VideoDetails) {
    let mut details = VideoDetails::default();
    let mut captured_at = None;

    // Extract format information
    if let Some(format) = ffprobe_data.get("format") {
        details.duration = string_number(format.get("duration"));

        captured_at = format
            .get("tags")
            .and_then(|tags| tags.get("creation_time"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Local));
    }

    let streams = ffprobe_data
        .get("streams")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let first_stream = |codec_type: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some(codec_type))
    };

    if let Some(stream) = first_stream("video") {
        details.width = stream.get("width").and_then(|v| v.as_i64()).map(|v| v as i32);
        details.height = stream.get("height").and_then(|v| v.as_i64()).map(|v| v as i32);
        details.video_codec = string_field(stream.get("codec_name"));
        details.video_bitrate = string_number(stream.get("bit_rate"));
        details.frame_rate = frame_rate(stream.get("avg_frame_rate"))
            .or_else(|| frame_rate(stream.get("r_frame_rate")));
    }

    if let Some(stream) = first_stream("audio") {
        details.audio_codec = string_field(stream.get("codec_name"));
        details.audio_bitrate = string_number(stream.get("bit_rate"));
        details.audio_sample_rate = string_number(stream.get("sample_rate"));
        details.audio_channels = stream.get("channels").and_then(|v| v.as_i64()).map(|v| v as i32);
    }

    (captured_at, details)
}

fn string_field(value: Option<&serde_json::Value>) -> Option<String> {
    value.and_then(|v| v.as_str()).map(str::to_string)
}

// ffprobe reports most numbers as JSON strings
fn string_number<T: std::str::FromStr>(value: Option<&serde_json::Value>) -> Option<T> {
    value.and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
}

/// `"30000/1001"` -> 29.97; `"0/0"` is treated as unknown
fn frame_rate(value: Option<&serde_json::Value>) -> Option<f64> {
    let (num, den) = value?.as_str()?.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    (den != 0.0 && num != 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReverseGeocoder for RecordingGeocoder {
        async fn reverse_geocode(&self, _latitude: f64, _longitude: f64) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some("Berlin, Germany".to_string())
        }
    }

    fn extractor(probe_program: &str) -> MetadataExtractor {
        let tools = ToolRunner::new(2, Duration::from_secs(5));
        let thumbnails = ThumbnailGenerator::new(tools.clone(), "definitely-not-ffmpeg".to_string());
        MetadataExtractor::new(
            Arc::new(Semaphore::new(2)),
            tools,
            probe_program.to_string(),
            thumbnails,
        )
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let data = json!({
            "format": {
                "duration": "12.480000",
                "bit_rate": "4000000",
                "tags": { "creation_time": "2023-06-15T10:20:30.000000Z" }
            },
            "streams": [
                { "codec_type": "data", "codec_name": "bin_data" },
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "avg_frame_rate": "30000/1001",
                    "bit_rate": "3800000"
                },
                { "codec_type": "video", "codec_name": "mjpeg", "width": 320, "height": 240 },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2,
                    "bit_rate": "192000"
                }
            ]
        });

        let (captured_at, details) = parse_ffprobe_output(&data);
        assert_eq!(details.duration, Some(12.48));
        assert_eq!(details.width, Some(1920));
        assert_eq!(details.height, Some(1080));
        assert_eq!(details.video_codec.as_deref(), Some("h264"));
        assert_eq!(details.video_bitrate, Some(3_800_000));
        assert!((details.frame_rate.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(details.audio_codec.as_deref(), Some("aac"));
        assert_eq!(details.audio_sample_rate, Some(48000));
        assert_eq!(details.audio_channels, Some(2));
        assert_eq!(
            captured_at.map(|dt| dt.with_timezone(&chrono::Utc).to_rfc3339()),
            Some("2023-06-15T10:20:30+00:00".to_string())
        );
    }

    #[test]
    fn test_parse_ffprobe_output_without_audio() {
        let data = json!({
            "format": {},
            "streams": [
                { "codec_type": "video", "codec_name": "hevc", "r_frame_rate": "25/1", "avg_frame_rate": "0/0" }
            ]
        });

        let (captured_at, details) = parse_ffprobe_output(&data);
        assert!(captured_at.is_none());
        assert_eq!(details.frame_rate, Some(25.0));
        assert!(details.audio_codec.is_none());
        assert!(details.audio_channels.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let source = SourceDescriptor::local(&path, 5);
        let err = extractor("ffprobe").extract(&source, &path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_corrupt_photo_is_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"this is not an image").unwrap();

        let source = SourceDescriptor::local(&path, 20);
        let err = extractor("ffprobe").extract(&source, &path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Exif { .. }));
    }

    #[tokio::test]
    async fn test_missing_probe_tool_is_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();

        let source = SourceDescriptor::local(&path, 18);
        let err = extractor("definitely-not-ffprobe")
            .extract(&source, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Probe(_)));
    }

    #[tokio::test]
    async fn test_locate_uses_geocoder_for_real_coordinates() {
        let geocoder = Arc::new(RecordingGeocoder {
            calls: AtomicUsize::new(0),
        });
        let extractor = extractor("ffprobe").with_geocoder(geocoder.clone());

        let mut details = PhotoDetails {
            latitude: Some(52.52),
            longitude: Some(13.405),
            ..Default::default()
        };
        extractor.locate(&mut details).await;
        assert_eq!(details.location_name.as_deref(), Some("Berlin, Germany"));

        let mut null_island = PhotoDetails {
            latitude: Some(0.0),
            longitude: Some(0.0),
            ..Default::default()
        };
        extractor.locate(&mut null_island).await;
        assert!(null_island.location_name.is_none());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }
}
