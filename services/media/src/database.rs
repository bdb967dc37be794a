use crate::catalog::{CatalogStore, CatalogTx};
use crate::models::{MediaDetails, MediaItem, MediaKind, PhotoDetails, UploadRecord, VideoDetails};
use async_trait::async_trait;
use chrono::Utc;
use common::error::{DatabaseError, DatabaseResult};
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL-backed catalog
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    inner: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogStore for PgCatalog {
    type Tx = PgTx;

    async fn begin(&self) -> DatabaseResult<PgTx> {
        let inner = self.pool.begin().await.map_err(DatabaseError::Connection)?;
        Ok(PgTx { inner })
    }

    async fn exists_by_name(&self, kind: MediaKind, name: &str) -> DatabaseResult<bool> {
        let query = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE name = $1)", kind.table());
        let exists: bool = sqlx::query_scalar(&query)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(exists)
    }

    async fn processed_names(&self, kind: MediaKind) -> DatabaseResult<HashSet<String>> {
        let query = format!("SELECT name FROM {}", kind.table());
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(rows.into_iter().map(|row| row.get("name")).collect())
    }

    async fn uploaded_hashes(&self) -> DatabaseResult<HashSet<String>> {
        let rows = sqlx::query("SELECT content_hash FROM uploads")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(rows.into_iter().map(|row| row.get("content_hash")).collect())
    }

    async fn mark_uploaded(&self, record: &UploadRecord) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO uploads (content_hash, name, local_path, remote_id)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.content_hash)
        .bind(&record.name)
        .bind(record.local_path.to_string_lossy().as_ref())
        .bind(&record.remote_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_query)?;

        Ok(())
    }
}

#[async_trait]
impl CatalogTx for PgTx {
    async fn insert(&mut self, item: &MediaItem) -> DatabaseResult<()> {
        match &item.details {
            MediaDetails::Photo(photo) => insert_photo(&mut self.inner, item, photo).await,
            MediaDetails::Video(video) => insert_video(&mut self.inner, item, video).await,
        }
    }

    async fn commit(self) -> DatabaseResult<()> {
        self.inner.commit().await.map_err(DatabaseError::Query)
    }

    async fn rollback(self) -> DatabaseResult<()> {
        self.inner.rollback().await.map_err(DatabaseError::Query)
    }
}

async fn insert_photo(
    tx: &mut Transaction<'static, Postgres>,
    item: &MediaItem,
    photo: &PhotoDetails,
) -> DatabaseResult<()> {
    sqlx::query(
        "INSERT INTO photos (name, path, mime_type, size, external_id, captured_at,
             aperture, shutter_speed, iso, focal_length, white_balance, width, height,
             orientation, latitude, longitude, altitude, device_make, device_model, location_name)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
    )
    .bind(&item.name)
    .bind(item.path.to_string_lossy().as_ref())
    .bind(&item.mime_type)
    .bind(item.size as i64)
    .bind(&item.external_id)
    .bind(item.captured_at().map(|t| t.with_timezone(&Utc)))
    .bind(photo.aperture)
    .bind(&photo.shutter_speed)
    .bind(photo.iso)
    .bind(photo.focal_length)
    .bind(&photo.white_balance)
    .bind(photo.width)
    .bind(photo.height)
    .bind(photo.orientation)
    .bind(photo.latitude)
    .bind(photo.longitude)
    .bind(photo.altitude)
    .bind(&photo.device_make)
    .bind(&photo.device_model)
    .bind(&photo.location_name)
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::from_query)?;

    Ok(())
}

async fn insert_video(
    tx: &mut Transaction<'static, Postgres>,
    item: &MediaItem,
    video: &VideoDetails,
) -> DatabaseResult<()> {
    sqlx::query(
        "INSERT INTO videos (name, path, mime_type, size, external_id, captured_at,
             duration, width, height, frame_rate, video_codec, video_bitrate, audio_codec,
             audio_bitrate, audio_channels, audio_sample_rate, thumbnail, thumbnail_mime_type)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(&item.name)
    .bind(item.path.to_string_lossy().as_ref())
    .bind(&item.mime_type)
    .bind(item.size as i64)
    .bind(&item.external_id)
    .bind(item.captured_at().map(|t| t.with_timezone(&Utc)))
    .bind(video.duration)
    .bind(video.width)
    .bind(video.height)
    .bind(video.frame_rate)
    .bind(&video.video_codec)
    .bind(video.video_bitrate)
    .bind(&video.audio_codec)
    .bind(video.audio_bitrate)
    .bind(video.audio_channels)
    .bind(video.audio_sample_rate)
    .bind(&video.thumbnail)
    .bind(&video.thumbnail_mime_type)
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::from_query)?;

    Ok(())
}
