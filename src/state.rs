use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::errors::{RelayError, RelayResult};
use crate::google::{DriveClient, ServiceAccountKey, SheetsClient, TokenProvider};
use crate::orchestrator::Orchestrator;
use crate::sheet::RowStore;
use crate::upload::{RetryPolicy, TokioSleeper, Uploader};
use crate::video::{
    fetch, is_aliexpress, is_instagram, DirectPageStrategy, PageSource, Route, SiteCookies,
    SourceExtractor, YtDlpStrategy,
};

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    // Jobs run one at a time; handlers hold this for the whole request.
    pub job_lock: Mutex<()>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            job_lock: Mutex::new(()),
        }
    }
}

fn client(builder: reqwest::ClientBuilder) -> RelayResult<reqwest::Client> {
    builder
        .build()
        .map_err(|e| RelayError::Internal(format!("cannot build HTTP client: {e}")))
}

/// Wires every component from the loaded configuration.
///
/// Fails with `CredentialsInvalid` when the service account key is unusable.
pub fn build_orchestrator(config: &Config) -> RelayResult<Orchestrator> {
    let key = ServiceAccountKey::load(&config.credentials)?;
    log::info!("Loaded service account {}", key.client_email);

    let api_http = client(reqwest::Client::builder().timeout(config.http_timeout))?;
    let media_http = fetch::media_client(config.http_timeout)?;

    let tokens = Arc::new(TokenProvider::new(key, api_http)?);

    let drive = DriveClient::new(tokens.clone(), config.http_timeout)?;
    let uploader = Uploader::new(
        drive,
        config.drive_folder_id.clone(),
        config.make_public,
        RetryPolicy {
            max_attempts: config.upload_max_attempts,
            backoff_step: config.upload_backoff,
        },
        Arc::new(TokioSleeper),
    );

    let rows = match &config.sheet {
        Some(sheet) => {
            let store: Arc<dyn RowStore> = Arc::new(SheetsClient::new(
                tokens,
                sheet.sheet_id.clone(),
                config.http_timeout,
            )?);
            log::info!(
                "Sheet {} enabled, range {}",
                sheet.sheet_id,
                sheet.layout.read_range
            );
            Some((store, sheet.layout.clone()))
        }
        None => None,
    };

    let page_source = match &config.webdriver_url {
        Some(url) => PageSource::Browser {
            webdriver_url: url.clone(),
        },
        None => PageSource::Http,
    };
    let direct = DirectPageStrategy::new(
        media_http.clone(),
        page_source,
        config.direct_cookies.clone(),
        PAGE_TIMEOUT,
    );
    let generic = YtDlpStrategy::new(
        config.ytdlp_bin.clone(),
        config.ytdlp_timeout,
        vec![SiteCookies {
            matches: is_instagram,
            inline: config.instagram_cookies.clone(),
            secret_path: config.instagram_cookies_path.clone(),
        }],
    );
    let extractor = SourceExtractor::new(
        vec![Route {
            matches: is_aliexpress,
            strategy: Arc::new(direct),
        }],
        Arc::new(generic),
        media_http,
    );

    std::fs::create_dir_all(&config.download_dir)?;

    Ok(Orchestrator::new(
        Arc::new(extractor),
        Arc::new(uploader),
        rows,
        config.download_dir.clone(),
    ))
}
