pub mod direct;
pub mod fetch;
pub mod patterns;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{RelayError, RelayResult};

pub use direct::{DirectPageStrategy, PageSource};
pub use ytdlp::{SiteCookies, YtDlpStrategy};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// What a strategy resolved a page URL to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocator {
    Remote(String),
    Local(PathBuf),
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `dest` is where a strategy that writes files should put the video.
    async fn extract(&self, url: &str, dest: &Path) -> RelayResult<MediaLocator>;
}

/// Turns a page URL into a local video file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> RelayResult<PathBuf>;
}

pub struct Route {
    pub matches: fn(&str) -> bool,
    pub strategy: Arc<dyn Strategy>,
}

pub fn host_of(url: &str) -> String {
    reqwest::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

pub fn is_aliexpress(host: &str) -> bool {
    ["aliexpress.com", "aliexpress.us", "aliexpress.ru"]
        .iter()
        .any(|d| host_is(host, d))
}

pub fn is_instagram(host: &str) -> bool {
    host_is(host, "instagram.com")
}

/// Tries the first matching route, then the generic fallback.
pub struct SourceExtractor {
    routes: Vec<Route>,
    fallback: Arc<dyn Strategy>,
    http: reqwest::Client,
}

impl SourceExtractor {
    pub fn new(routes: Vec<Route>, fallback: Arc<dyn Strategy>, http: reqwest::Client) -> Self {
        Self {
            routes,
            fallback,
            http,
        }
    }

    async fn materialize(
        &self,
        locator: MediaLocator,
        page_url: &str,
        dest: &Path,
    ) -> RelayResult<PathBuf> {
        match locator {
            MediaLocator::Remote(media_url) => {
                fetch::download_to(&self.http, &media_url, page_url, dest).await
            }
            MediaLocator::Local(path) => match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.len() > 0 => Ok(path),
                _ => Err(RelayError::DownloadFailed(format!(
                    "no output file at {}",
                    path.to_string_lossy()
                ))),
            },
        }
    }

    async fn run(&self, strategy: &dyn Strategy, url: &str, dest: &Path) -> RelayResult<PathBuf> {
        log::info!("Extracting {url} with {}", strategy.name());
        let locator = strategy.extract(url, dest).await?;
        self.materialize(locator, url, dest).await
    }
}

#[async_trait]
impl MediaFetcher for SourceExtractor {
    async fn fetch(&self, url: &str, dest: &Path) -> RelayResult<PathBuf> {
        let host = host_of(url);
        if let Some(route) = self.routes.iter().find(|r| (r.matches)(&host)) {
            match self.run(route.strategy.as_ref(), url, dest).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    log::warn!(
                        "{} failed for {url}: {e}; falling back to {}",
                        route.strategy.name(),
                        self.fallback.name()
                    );
                    if let Err(e) = tokio::fs::remove_file(dest).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            log::warn!("Could not remove partial file: {e}");
                        }
                    }
                }
            }
        }
        self.run(self.fallback.as_ref(), url, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        name: &'static str,
        result: Result<Option<&'static str>, &'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn writes(name: &'static str, contents: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(Some(contents)),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn fails(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err("nothing found"),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Strategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, url: &str, dest: &Path) -> RelayResult<MediaLocator> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.result {
                Ok(Some(contents)) => {
                    tokio::fs::write(dest, contents).await?;
                    Ok(MediaLocator::Local(dest.to_path_buf()))
                }
                Ok(None) => Ok(MediaLocator::Local(dest.to_path_buf())),
                Err(msg) => Err(RelayError::ExtractionFailed(msg.to_string())),
            }
        }
    }

    fn extractor(direct: Arc<Scripted>, generic: Arc<Scripted>) -> SourceExtractor {
        SourceExtractor::new(
            vec![Route {
                matches: is_aliexpress,
                strategy: direct,
            }],
            generic,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn host_matching() {
        assert_eq!(host_of("https://WWW.AliExpress.com/item/1.html"), "www.aliexpress.com");
        assert_eq!(host_of("not a url"), "");
        assert!(is_aliexpress("aliexpress.com"));
        assert!(is_aliexpress("m.aliexpress.us"));
        assert!(!is_aliexpress("notaliexpress.com"));
        assert!(is_instagram("www.instagram.com"));
        assert!(!is_instagram("instagram.com.evil.io"));
    }

    #[tokio::test]
    async fn matching_route_runs_first() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp4");
        let direct = Scripted::writes("direct", "direct-bytes");
        let generic = Scripted::writes("generic", "generic-bytes");
        let ex = extractor(direct.clone(), generic.clone());

        let path = ex
            .fetch("https://www.aliexpress.com/item/1.html", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "direct-bytes");
        assert_eq!(direct.calls(), 1);
        assert_eq!(generic.calls(), 0);
    }

    #[tokio::test]
    async fn failed_route_falls_back_to_generic() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp4");
        let direct = Scripted::fails("direct");
        let generic = Scripted::writes("generic", "generic-bytes");
        let ex = extractor(direct.clone(), generic.clone());

        let path = ex
            .fetch("https://aliexpress.com/item/1.html", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "generic-bytes");
        assert_eq!(direct.calls(), 1);
        assert_eq!(generic.calls(), 1);
    }

    #[tokio::test]
    async fn other_hosts_go_straight_to_generic() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp4");
        let direct = Scripted::writes("direct", "direct-bytes");
        let generic = Scripted::writes("generic", "generic-bytes");
        let ex = extractor(direct.clone(), generic.clone());

        ex.fetch("https://www.tiktok.com/@x/video/123", &dest)
            .await
            .unwrap();
        assert_eq!(direct.calls(), 0);
        assert_eq!(generic.calls(), 1);
    }

    #[tokio::test]
    async fn missing_output_is_download_failed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.mp4");
        let generic = Arc::new(Scripted {
            name: "generic",
            result: Ok(None),
            calls: Mutex::new(Vec::new()),
        });
        let ex = extractor(Scripted::fails("direct"), generic);

        let err = ex
            .fetch("https://www.tiktok.com/@x/video/123", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DownloadFailed(_)));
    }
}
