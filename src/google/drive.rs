use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::errors::{RelayError, RelayResult};
use crate::google::auth::TokenProvider;
use crate::upload::{
    FolderStatus, ObjectStore, SessionStatus, UploadSession, UploadedObject,
};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const UPLOAD_FIELDS: &str = "id,webViewLink,webContentLink";
// Must be a multiple of 256 KiB.
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderMeta {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    trashed: bool,
}

pub struct DriveClient {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    api_base: String,
    upload_base: String,
    chunk_size: usize,
}

fn upload_error(context: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::UploadFailed(format!("{context}: {e}"))
}

fn unreachable_error(context: &str, e: &reqwest::Error) -> RelayError {
    RelayError::Unavailable(format!("{context}: {e}"))
}

/// Next byte offset from a `Range: bytes=0-N` header, 0 when absent.
fn next_offset(headers: &header::HeaderMap) -> u64 {
    headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('-').next())
        .and_then(|end| end.trim().parse::<u64>().ok())
        .map_or(0, |end| end + 1)
}

impl DriveClient {
    pub fn new(tokens: Arc<TokenProvider>, timeout: Duration) -> RelayResult<Self> {
        // 308 is the resumable protocol's "keep going", not a redirect.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("cannot build Drive client: {e}")))?;
        Ok(Self {
            http,
            tokens,
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    #[must_use]
    pub fn with_base_urls(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn finished(resp: reqwest::Response) -> RelayResult<UploadedObject> {
        resp.json::<UploadedObject>()
            .await
            .map_err(|e| upload_error("bad upload response", e))
    }
}

#[async_trait]
impl ObjectStore for DriveClient {
    async fn folder_status(&self, folder_id: &str) -> RelayResult<FolderStatus> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(format!("{}/files/{folder_id}", self.api_base))
            .query(&[
                ("fields", "id,mimeType,trashed"),
                ("supportsAllDrives", "true"),
            ])
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| unreachable_error("folder lookup failed", &e))?;

        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => return Ok(FolderStatus::Missing),
            s if !s.is_success() => {
                return Err(RelayError::from_status("folder lookup", s, RelayError::UploadFailed))
            }
            _ => {}
        }

        let meta: FolderMeta = resp
            .json()
            .await
            .map_err(|e| upload_error("bad folder metadata", e))?;
        Ok(if meta.trashed {
            FolderStatus::Trashed
        } else if meta.mime_type != FOLDER_MIME {
            FolderStatus::NotAFolder
        } else {
            FolderStatus::Ready
        })
    }

    async fn open_session(
        &self,
        path: &Path,
        name: &str,
        folder_id: &str,
    ) -> RelayResult<UploadSession> {
        let total = tokio::fs::metadata(path).await?.len();
        if total == 0 {
            return Err(RelayError::UploadFailed(format!(
                "{} is empty",
                path.to_string_lossy()
            )));
        }

        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(format!("{}/files", self.upload_base))
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", UPLOAD_FIELDS),
            ])
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", total.to_string())
            .json(&serde_json::json!({
                "name": name,
                "parents": [folder_id],
            }))
            .send()
            .await
            .map_err(|e| unreachable_error("session request failed", &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::warn!("Session start for {name} returned {status}: {body}");
            return Err(RelayError::from_status(
                "session start",
                status,
                RelayError::UploadFailed,
            ));
        }

        let uri = resp
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| {
                RelayError::UploadFailed("session has no Location header".to_string())
            })?;
        log::debug!("Resumable session opened for {name} ({total} bytes)");
        Ok(UploadSession { uri, total })
    }

    async fn session_status(&self, session: &UploadSession) -> RelayResult<SessionStatus> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .put(&session.uri)
            .bearer_auth(&token)
            .header(header::CONTENT_RANGE, format!("bytes */{}", session.total))
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| unreachable_error("session status request failed", &e))?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                Ok(SessionStatus::Complete(Self::finished(resp).await?))
            }
            StatusCode::PERMANENT_REDIRECT => {
                Ok(SessionStatus::Resume(next_offset(resp.headers())))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(SessionStatus::Expired),
            s => Err(RelayError::from_status("session status", s, RelayError::UploadFailed)),
        }
    }

    async fn send_from(
        &self,
        session: &UploadSession,
        path: &Path,
        offset: u64,
    ) -> RelayResult<UploadedObject> {
        let mut file = tokio::fs::File::open(path).await?;
        let total = session.total;
        let token = self.tokens.access_token().await?;
        let chunk_size = self.chunk_size as u64;
        let mut offset = offset;
        loop {
            if offset >= total {
                return Err(RelayError::UploadFailed(
                    "all bytes acknowledged but upload not finalized".to_string(),
                ));
            }
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut chunk = Vec::new();
            (&mut file).take(chunk_size).read_to_end(&mut chunk).await?;
            if chunk.is_empty() {
                return Err(RelayError::UploadFailed(format!(
                    "{} shrank below {total} bytes",
                    path.to_string_lossy()
                )));
            }
            let end = offset + chunk.len() as u64 - 1;

            let resp = self
                .http
                .put(&session.uri)
                .bearer_auth(&token)
                .header(header::CONTENT_RANGE, format!("bytes {offset}-{end}/{total}"))
                .body(chunk)
                .send()
                .await
                .map_err(|e| unreachable_error("chunk upload failed", &e))?;

            match resp.status() {
                StatusCode::OK | StatusCode::CREATED => return Self::finished(resp).await,
                StatusCode::PERMANENT_REDIRECT => {
                    let next = next_offset(resp.headers());
                    if next <= offset {
                        return Err(RelayError::Unavailable(format!(
                            "upload stalled at byte {offset}"
                        )));
                    }
                    log::debug!("Uploaded {next}/{total} bytes");
                    offset = next;
                }
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    return Err(RelayError::Unavailable("upload session expired".to_string()));
                }
                s => {
                    let body = resp.text().await.unwrap_or_default();
                    log::warn!("Chunk upload returned {s}: {body}");
                    return Err(RelayError::from_status(
                        "chunk upload",
                        s,
                        RelayError::UploadFailed,
                    ));
                }
            }
        }
    }

    async fn grant_public_read(&self, file_id: &str) -> RelayResult<()> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(format!("{}/files/{file_id}/permissions", self.api_base))
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(&token)
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await
            .map_err(|e| RelayError::Internal(format!("permission request failed: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(RelayError::Internal(format!(
                "permission request returned {}",
                resp.status()
            )))
        }
    }
}
