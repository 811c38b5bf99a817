//! Attachment blobs on local disk.
//!
//! Uploads are stored under `<root>/<uuid>` and exposed as `/files/<uuid>`.
//! Messages only carry the resulting [`FileRef`]; removal is best-effort and
//! never fails the request that triggered it.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rally_types::models::{FileRef, Identity};

use crate::error::ApiError;
use crate::state::AppState;

/// 50 MB upload limit for files
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

pub const FILE_NAME_HEADER: &str = "x-file-name";

const URL_PREFIX: &str = "/files/";

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &FsPath {
        &self.root
    }

    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<FileRef> {
        tokio::fs::create_dir_all(&self.root).await?;

        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        Ok(FileRef {
            file_url: format!("{}{}", URL_PREFIX, id),
            file_name: file_name.to_string(),
        })
    }

    pub async fn read(&self, id: Uuid) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.root.join(id.to_string())).await
    }

    /// Remove the blob behind `file_url`. URLs this store did not issue
    /// are ignored.
    pub async fn remove(&self, file_url: &str) {
        let Some(id) = blob_id(file_url) else {
            debug!("Not removing foreign file url {}", file_url);
            return;
        };
        match tokio::fs::remove_file(self.root.join(id.to_string())).await {
            Ok(()) => info!("Removed blob {}", id),
            Err(e) => warn!("Failed to remove blob {}: {}", id, e),
        }
    }

    pub async fn remove_all(&self, files: &[FileRef]) {
        for file in files {
            self.remove(&file.file_url).await;
        }
    }
}

fn blob_id(file_url: &str) -> Option<Uuid> {
    file_url.strip_prefix(URL_PREFIX)?.parse().ok()
}

/// Display name for an upload: the last path component of `x-file-name`.
fn upload_name(headers: &HeaderMap) -> String {
    headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// POST /files: raw bytes in, `{file_url, file_name}` out.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let file_name = upload_name(&headers);
    let file = state.media.save(&file_name, &bytes).await.map_err(|e| {
        error!("Failed to store upload from {}: {}", identity.user_id, e);
        ApiError::Internal
    })?;

    info!(
        "{} uploaded {} ({} bytes) as {}",
        identity.username,
        file.file_name,
        bytes.len(),
        file.file_url
    );
    Ok((StatusCode::CREATED, Json(file)))
}

/// GET /files/{file_id}
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Only uuids map onto disk paths
    let id: Uuid = file_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid file id".into()))?;

    let bytes = state
        .media
        .read(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("File not found: {}", id)))?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}
