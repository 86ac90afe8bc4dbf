use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::{RelayError, RelayResult};
use crate::video::{host_of, MediaLocator, Strategy, ACCEPT_LANGUAGE, USER_AGENT};

// Prefer a single file that already has audio and video.
const FORMAT: &str = "b[ext=mp4]/bv*+ba/b";
const STDERR_TAIL_LINES: usize = 20;

/// Cookie jar for one site: inline contents win over the secret file.
#[derive(Debug, Clone)]
pub struct SiteCookies {
    pub matches: fn(&str) -> bool,
    pub inline: Option<String>,
    pub secret_path: PathBuf,
}

impl SiteCookies {
    async fn contents(&self) -> Option<String> {
        if let Some(inline) = &self.inline {
            log::info!("Using cookies from environment");
            return Some(inline.clone());
        }
        match tokio::fs::read_to_string(&self.secret_path).await {
            Ok(contents) => {
                log::info!("Using cookies from {}", self.secret_path.to_string_lossy());
                Some(contents)
            }
            Err(_) => None,
        }
    }
}

pub struct YtDlpStrategy {
    bin: PathBuf,
    timeout: Duration,
    cookies: Vec<SiteCookies>,
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    if lines.is_empty() {
        "no stderr output captured".to_string()
    } else {
        lines[start..].join("\n")
    }
}

impl YtDlpStrategy {
    pub fn new(bin: PathBuf, timeout: Duration, cookies: Vec<SiteCookies>) -> Self {
        Self {
            bin,
            timeout,
            cookies,
        }
    }

    /// The secret mount is read-only, so the jar is copied next to the download.
    async fn cookie_file(&self, url: &str, dest: &Path) -> RelayResult<Option<PathBuf>> {
        let host = host_of(url);
        let Some(site) = self.cookies.iter().find(|c| (c.matches)(&host)) else {
            return Ok(None);
        };
        let Some(contents) = site.contents().await else {
            return Ok(None);
        };
        let path = dest.with_extension("cookies.txt");
        tokio::fs::write(&path, contents).await?;
        Ok(Some(path))
    }

    fn command(&self, url: &str, dest: &Path, cookie_file: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--no-playlist")
            .arg("--no-part")
            .arg("--no-cache-dir")
            .arg("--user-agent")
            .arg(USER_AGENT)
            .arg("--add-header")
            .arg(format!("Accept-Language:{ACCEPT_LANGUAGE}"))
            .arg("-f")
            .arg(FORMAT)
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("-o")
            .arg(dest);
        if let Some(cookie_file) = cookie_file {
            cmd.arg("--cookies").arg(cookie_file);
        }
        cmd.arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, url: &str, dest: &Path, cookie_file: Option<&Path>) -> RelayResult<()> {
        let child = self.command(url, dest, cookie_file).output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                RelayError::DownloadFailed(format!("yt-dlp timed out after {:?}", self.timeout))
            })?
            .map_err(|e| RelayError::DownloadFailed(format!("failed to run yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(RelayError::DownloadFailed(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for YtDlpStrategy {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract(&self, url: &str, dest: &Path) -> RelayResult<MediaLocator> {
        let cookie_file = self.cookie_file(url, dest).await?;
        let result = self.run(url, dest, cookie_file.as_deref()).await;
        if let Some(path) = cookie_file {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("Could not remove cookie copy {}: {e}", path.to_string_lossy());
            }
        }
        result?;

        match tokio::fs::metadata(dest).await {
            Ok(meta) if meta.len() > 0 => {
                log::info!("yt-dlp wrote {} bytes", meta.len());
                Ok(MediaLocator::Local(dest.to_path_buf()))
            }
            _ => Err(RelayError::DownloadFailed(
                "yt-dlp finished without producing a file".to_string(),
            )),
        }
    }
}
