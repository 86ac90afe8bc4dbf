use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::errors::{RelayError, RelayResult};
use crate::filename::{ordinal_name, sanitize_filename};
use crate::sheet::{self, RowStatus, RowStore, SheetLayout, WorkItem};
use crate::upload::{FileUploader, UploadedObject};
use crate::video::MediaFetcher;

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub url: String,
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_file: Option<UploadedObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
    pub row_index: usize,
    pub name: String,
    pub status: RowStatus,
    pub links_count: usize,
    pub drive_links: Vec<String>,
    pub items: Vec<ItemReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writeback_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub success: bool,
    pub count: usize,
    pub results: Vec<RowReport>,
}

pub fn aggregate_status(items: &[ItemReport]) -> RowStatus {
    if items.iter().all(|i| i.success) {
        RowStatus::Done
    } else {
        RowStatus::Partial
    }
}

async fn remove_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::info!("Deleted local file {}", path.to_string_lossy()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not delete {}: {e}", path.to_string_lossy()),
    }
}

fn validate_url(url: &str) -> RelayResult<()> {
    if url.is_empty() {
        return Err(RelayError::InvalidRequest("Missing url".to_string()));
    }
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(RelayError::InvalidRequest(format!("Not an http(s) URL: {url}"))),
    }
}

pub struct Orchestrator {
    fetcher: Arc<dyn MediaFetcher>,
    uploader: Arc<dyn FileUploader>,
    rows: Option<(Arc<dyn RowStore>, SheetLayout)>,
    work_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        uploader: Arc<dyn FileUploader>,
        rows: Option<(Arc<dyn RowStore>, SheetLayout)>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            uploader,
            rows,
            work_dir,
        }
    }

    /// Download one URL, upload it under the sanitized name, clean up.
    pub async fn process_one(
        &self,
        url: &str,
        name: Option<&str>,
    ) -> RelayResult<(UploadedObject, String)> {
        let url = url.trim();
        validate_url(url)?;
        let final_name = sanitize_filename(name);
        // Extractors may leave fragments beside the target; the whole directory goes.
        let job_dir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.work_dir)?;
        let dest = job_dir.path().join("media.mp4");
        log::info!("Processing {url} as {final_name}");

        let outcome = match self.fetcher.fetch(url, &dest).await {
            Ok(local) => {
                let uploaded = self.uploader.upload(&local, &final_name).await;
                if !local.starts_with(job_dir.path()) {
                    remove_local(&local).await;
                }
                uploaded
            }
            Err(e) => Err(e),
        };

        let job_path = job_dir.path().to_path_buf();
        match job_dir.close() {
            Ok(()) => log::info!("Deleted local files in {}", job_path.to_string_lossy()),
            Err(e) => log::warn!("Could not delete {}: {e}", job_path.to_string_lossy()),
        }

        outcome.map(|uploaded| (uploaded, final_name))
    }

    async fn process_item(&self, item: &WorkItem) -> RowReport {
        let mut items = Vec::with_capacity(item.urls.len());
        let mut drive_links = Vec::new();

        for (idx, url) in item.urls.iter().enumerate() {
            let per_link_name = ordinal_name(&item.name, idx + 1);
            match self.process_one(url, Some(per_link_name.as_str())).await {
                Ok((uploaded, filename)) => {
                    drive_links.push(uploaded.web_view_link.clone().unwrap_or_default());
                    items.push(ItemReport {
                        url: url.clone(),
                        filename,
                        success: true,
                        drive_file: Some(uploaded),
                        error: None,
                    });
                }
                Err(e) => {
                    log::error!("Row {} link {url} failed: {e}", item.row_index);
                    items.push(ItemReport {
                        url: url.clone(),
                        filename: sanitize_filename(Some(per_link_name.as_str())),
                        success: false,
                        drive_file: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        RowReport {
            row_index: item.row_index,
            name: item.name.clone(),
            status: aggregate_status(&items),
            links_count: item.urls.len(),
            drive_links,
            items,
            writeback_error: None,
        }
    }

    /// Work through pending sheet rows, writing each row's outcome back.
    pub async fn process_rows(&self, limit: Option<usize>) -> RelayResult<BatchSummary> {
        let (store, layout) = self.rows.as_ref().ok_or(RelayError::SheetNotConfigured)?;
        let mut pending = sheet::read_pending(store.as_ref(), layout).await?;
        if let Some(limit) = limit.filter(|l| *l > 0) {
            pending.truncate(limit);
        }

        let mut results = Vec::with_capacity(pending.len());
        for item in &pending {
            let mut report = self.process_item(item).await;
            if let Err(e) = sheet::write_result(
                store.as_ref(),
                layout,
                item.row_index,
                &report.drive_links,
                report.status,
            )
            .await
            {
                log::error!("Could not record row {}: {e}", item.row_index);
                report.writeback_error = Some(e.to_string());
            }
            log::info!("Row {} finished {}", item.row_index, report.status.as_str());
            results.push(report);
        }

        Ok(BatchSummary {
            success: true,
            count: results.len(),
            results,
        })
    }
}
