//! Cloud drive client
//!
//! [`DriveClient`] is the capability the pipeline consumes; [`GoogleDrive`]
//! implements it against the Drive v3 REST API.

use crate::error::DriveError;
use crate::models::SourceDescriptor;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const MEDIA_QUERY: &str =
    "(mimeType contains 'image/' or mimeType contains 'video/') and trashed = false";

#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Every media file visible to the account
    async fn list_files(&self) -> Result<Vec<SourceDescriptor>, DriveError>;

    /// Download `descriptor` to exactly `destination`.
    ///
    /// On error no partial file is left at `destination`.
    async fn download(&self, descriptor: &SourceDescriptor, destination: &Path) -> Result<(), DriveError>;

    /// Create the remote file and stream `path` into it; returns the remote id
    async fn upload(&self, descriptor: &SourceDescriptor, path: &Path) -> Result<String, DriveError>;

    async fn delete(&self, remote_id: &str) -> Result<(), DriveError>;
}

/// The last path component of a drive file name, safe to join onto a local
/// directory. `None` when nothing usable remains (empty, `.` or `..`).
pub fn local_file_name(name: &str) -> Option<&str> {
    match Path::new(name).file_name()?.to_str()? {
        "" | "." | ".." => None,
        file_name => Some(file_name),
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    // Drive encodes int64 as a string
    size: Option<String>,
}

impl From<DriveFile> for SourceDescriptor {
    fn from(file: DriveFile) -> Self {
        SourceDescriptor {
            name: file.name,
            mime_type: file.mime_type,
            size: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            external_id: Some(file.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Clone)]
pub struct GoogleDrive {
    client: Client,
    access_token: String,
    folder_id: Option<String>,
}

impl GoogleDrive {
    pub fn new(access_token: String, folder_id: Option<String>) -> Result<Self, DriveError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            access_token,
            folder_id,
        })
    }

    /// Build a client from a JSON credentials file holding `access_token`
    pub async fn from_credentials_file(
        path: &Path,
        folder_id: Option<String>,
    ) -> Result<Self, DriveError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| DriveError::Credentials(format!("{}: {}", path.display(), e)))?;
        let credentials: Credentials = serde_json::from_slice(&raw)
            .map_err(|e| DriveError::Credentials(format!("{}: {}", path.display(), e)))?;

        Self::new(credentials.access_token, folder_id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DriveError> {
        let response = self.authorized(request).send().await?;
        check_status(response).await
    }
}

/// Map error statuses; 401 and 403 mean the credential is unusable
async fn check_status(response: Response) -> Result<Response, DriveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DriveError::Unauthorized(message)),
        _ => Err(DriveError::Http {
            status: status.as_u16(),
            message,
        }),
    }
}

async fn write_body(mut response: Response, destination: &Path) -> Result<(), DriveError> {
    let mut file = tokio::fs::File::create(destination).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl DriveClient for GoogleDrive {
    async fn list_files(&self) -> Result<Vec<SourceDescriptor>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("q", MEDIA_QUERY.to_string()),
                ("fields", "nextPageToken,files(id,name,mimeType,size)".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let response = self.send(self.client.get(FILES_URL).query(&query)).await?;
            let page: FileList = response.json().await?;
            files.extend(page.files.into_iter().map(SourceDescriptor::from));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!("Found {} media files on the drive", files.len());
        Ok(files)
    }

    async fn download(&self, descriptor: &SourceDescriptor, destination: &Path) -> Result<(), DriveError> {
        let id = descriptor
            .external_id
            .as_deref()
            .ok_or(DriveError::MalformedResponse("file id"))?;

        let url = format!("{}/{}", FILES_URL, id);
        let response = self
            .send(self.client.get(url).query(&[("alt", "media")]))
            .await?;

        if let Err(e) = write_body(response, destination).await {
            if let Err(cleanup) = tokio::fs::remove_file(destination).await {
                warn!("Failed to remove partial download {}: {}", destination.display(), cleanup);
            }
            return Err(e);
        }

        debug!("Downloaded {} to {}", descriptor.name, destination.display());
        Ok(())
    }

    async fn upload(&self, descriptor: &SourceDescriptor, path: &Path) -> Result<String, DriveError> {
        let mut metadata = json!({
            "name": descriptor.name,
            "mimeType": descriptor.mime_type,
        });
        if let Some(folder_id) = &self.folder_id {
            metadata["parents"] = json!([folder_id]);
        }

        // Resumable upload: create the file, then stream the content to the session URL
        let session = self
            .send(
                self.client
                    .post(UPLOAD_URL)
                    .query(&[("uploadType", "resumable")])
                    .header("X-Upload-Content-Type", &descriptor.mime_type)
                    .json(&metadata),
            )
            .await?;
        let session_url = session
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(DriveError::MalformedResponse("upload session location"))?
            .to_string();

        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let response = self
            .send(
                self.client
                    .put(session_url)
                    .header(header::CONTENT_LENGTH, length)
                    .header(header::CONTENT_TYPE, &descriptor.mime_type)
                    .body(file),
            )
            .await?;

        let created: CreatedFile = response.json().await?;
        info!("Uploaded {} as {}", descriptor.name, created.id);
        Ok(created.id)
    }

    async fn delete(&self, remote_id: &str) -> Result<(), DriveError> {
        let url = format!("{}/{}", FILES_URL, remote_id);
        self.send(self.client.delete(url)).await?;
        info!("Deleted remote file {}", remote_id);
        Ok(())
    }
}
