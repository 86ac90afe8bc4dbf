use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header;
use tokio::io::AsyncWriteExt;

use crate::errors::{RelayError, RelayResult};
use crate::video::USER_AGENT;

fn download_error(media_url: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::DownloadFailed(format!("{media_url}: {e}"))
}

/// Client for media bodies: no overall deadline, but every read must make
/// progress within `timeout`.
pub fn media_client(timeout: Duration) -> RelayResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| RelayError::Internal(format!("cannot build media client: {e}")))
}

/// Streams `media_url` into `dest`, sending the page it came from as referer.
pub async fn download_to(
    http: &reqwest::Client,
    media_url: &str,
    referer: &str,
    dest: &Path,
) -> RelayResult<PathBuf> {
    log::info!("Downloading {media_url}");
    let mut resp = http
        .get(media_url)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::REFERER, referer)
        .send()
        .await
        .map_err(|e| download_error(media_url, e))?;

    if !resp.status().is_success() {
        return Err(download_error(
            media_url,
            format!("server returned {}", resp.status()),
        ));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| download_error(media_url, e))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if written == 0 {
        return Err(download_error(media_url, "empty response body"));
    }
    log::info!("Saved {written} bytes to {}", dest.to_string_lossy());
    Ok(dest.to_path_buf())
}
