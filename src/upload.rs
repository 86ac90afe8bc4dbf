use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, RelayResult};

/// Identifiers of a file after it landed in remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub id: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    Ready,
    Missing,
    Trashed,
    NotAFolder,
}

/// An open resumable upload; acknowledged bytes survive a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub uri: String,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Continue sending from this byte offset.
    Resume(u64),
    Complete(UploadedObject),
    /// The server no longer knows the session.
    Expired,
}

/// Remote storage operations the uploader needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn folder_status(&self, folder_id: &str) -> RelayResult<FolderStatus>;

    async fn open_session(
        &self,
        path: &Path,
        name: &str,
        folder_id: &str,
    ) -> RelayResult<UploadSession>;

    async fn session_status(&self, session: &UploadSession) -> RelayResult<SessionStatus>;

    /// Sends the file from byte `offset` to the end.
    async fn send_from(
        &self,
        session: &UploadSession,
        path: &Path,
        offset: u64,
    ) -> RelayResult<UploadedObject>;

    async fn grant_public_read(&self, file_id: &str) -> RelayResult<()>;
}

/// Anything that can take a local file and return where it ended up.
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(&self, path: &Path, name: &str) -> RelayResult<UploadedObject>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounded retry with linear backoff: the wait after failed attempt `n` is `n * step`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

pub struct Uploader<S> {
    store: S,
    folder_id: String,
    make_public: bool,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: ObjectStore> Uploader<S> {
    pub fn new(
        store: S,
        folder_id: String,
        make_public: bool,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            folder_id,
            make_public,
            policy,
            sleeper,
        }
    }

    async fn ensure_folder(&self) -> RelayResult<()> {
        match self.store.folder_status(&self.folder_id).await? {
            FolderStatus::Ready => Ok(()),
            FolderStatus::Missing => Err(RelayError::FolderUnavailable(self.folder_id.clone())),
            FolderStatus::Trashed => Err(RelayError::UploadFailed(format!(
                "folder {} is in the trash",
                self.folder_id
            ))),
            FolderStatus::NotAFolder => Err(RelayError::UploadFailed(format!(
                "{} is not a folder",
                self.folder_id
            ))),
        }
    }

    /// One attempt. A session left by an earlier attempt is resumed, not reopened.
    async fn attempt(
        &self,
        path: &Path,
        name: &str,
        session: &mut Option<UploadSession>,
    ) -> RelayResult<UploadedObject> {
        self.ensure_folder().await?;

        let mut offset = 0;
        if let Some(open) = session.as_ref() {
            match self.store.session_status(open).await? {
                SessionStatus::Complete(uploaded) => return Ok(uploaded),
                SessionStatus::Resume(next) => {
                    log::info!("Resuming {name} at byte {next}/{}", open.total);
                    offset = next;
                }
                SessionStatus::Expired => {
                    log::warn!("Upload session for {name} expired, starting over");
                    *session = None;
                }
            }
        }

        let open = match session.take() {
            Some(open) => open,
            None => {
                self.store
                    .open_session(path, name, &self.folder_id)
                    .await?
            }
        };
        let result = self.store.send_from(&open, path, offset).await;
        *session = Some(open);
        result
    }
}

#[async_trait]
impl<S: ObjectStore> FileUploader for Uploader<S> {
    async fn upload(&self, path: &Path, name: &str) -> RelayResult<UploadedObject> {
        let mut session = None;
        let mut attempt = 1;
        let uploaded = loop {
            log::info!(
                "Uploading {} as {name} (attempt {attempt}/{})",
                path.to_string_lossy(),
                self.policy.max_attempts
            );
            match self.attempt(path, name, &mut session).await {
                Ok(uploaded) => break uploaded,
                Err(e) if !e.is_transient() => {
                    log::error!("Upload of {name} failed: {e}");
                    return Err(e);
                }
                Err(e) if attempt < self.policy.max_attempts => {
                    let wait = self.policy.backoff(attempt);
                    log::warn!("Upload attempt {attempt} failed: {e}; retrying in {wait:?}");
                    self.sleeper.sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("Upload gave up after {attempt} attempts: {e}");
                    return Err(RelayError::UploadFailed(format!(
                        "{attempt} attempts exhausted, last error: {e}"
                    )));
                }
            }
        };

        if self.make_public {
            if let Err(e) = self.store.grant_public_read(&uploaded.id).await {
                log::warn!("Could not make {} public: {e}", uploaded.id);
            }
        }

        log::info!("Uploaded {name} as {}", uploaded.id);
        Ok(uploaded)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) fn uploaded(id: &str) -> UploadedObject {
        UploadedObject {
            id: id.to_string(),
            web_view_link: Some(format!("https://drive.google.com/file/d/{id}/view")),
            web_content_link: Some(format!("https://drive.google.com/uc?id={id}")),
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    /// Accepts the first 4 bytes of every session, then fails `send_failures` times.
    struct FlakyStore {
        folder: FolderStatus,
        folder_outages: Mutex<u32>,
        send_failures: u32,
        rejects_upload: bool,
        sessions_expire: bool,
        permission_fails: bool,
        sessions: Mutex<u32>,
        sends: Mutex<Vec<u64>>,
        permissions: Mutex<Vec<String>>,
    }

    const ACKNOWLEDGED: u64 = 4;

    impl FlakyStore {
        fn new(send_failures: u32) -> Self {
            Self {
                folder: FolderStatus::Ready,
                folder_outages: Mutex::new(0),
                send_failures,
                rejects_upload: false,
                sessions_expire: false,
                permission_fails: false,
                sessions: Mutex::new(0),
                sends: Mutex::new(Vec::new()),
                permissions: Mutex::new(Vec::new()),
            }
        }

        fn sends(&self) -> Vec<u64> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn folder_status(&self, _folder_id: &str) -> RelayResult<FolderStatus> {
            let mut outages = self.folder_outages.lock().unwrap();
            if *outages > 0 {
                *outages -= 1;
                return Err(RelayError::Unavailable("folder lookup returned 503".into()));
            }
            Ok(self.folder)
        }

        async fn open_session(
            &self,
            _path: &Path,
            _name: &str,
            _folder_id: &str,
        ) -> RelayResult<UploadSession> {
            let mut sessions = self.sessions.lock().unwrap();
            *sessions += 1;
            Ok(UploadSession {
                uri: format!("session-{sessions}"),
                total: 6,
            })
        }

        async fn session_status(&self, _session: &UploadSession) -> RelayResult<SessionStatus> {
            Ok(if self.sessions_expire {
                SessionStatus::Expired
            } else {
                SessionStatus::Resume(ACKNOWLEDGED)
            })
        }

        async fn send_from(
            &self,
            _session: &UploadSession,
            _path: &Path,
            offset: u64,
        ) -> RelayResult<UploadedObject> {
            let mut sends = self.sends.lock().unwrap();
            sends.push(offset);
            if self.rejects_upload {
                Err(RelayError::UploadFailed("chunk upload returned 400".into()))
            } else if sends.len() <= self.send_failures as usize {
                Err(RelayError::Unavailable("chunk upload returned 503".into()))
            } else {
                Ok(uploaded("abc"))
            }
        }

        async fn grant_public_read(&self, file_id: &str) -> RelayResult<()> {
            self.permissions.lock().unwrap().push(file_id.to_string());
            if self.permission_fails {
                Err(RelayError::Internal("403".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn uploader(
        store: FlakyStore,
        make_public: bool,
        sleeper: Arc<RecordingSleeper>,
    ) -> Uploader<FlakyStore> {
        Uploader::new(
            store,
            "folder".to_string(),
            make_public,
            RetryPolicy::default(),
            sleeper,
        )
    }

    #[tokio::test]
    async fn retries_resume_the_same_session() {
        for failures in 0..5 {
            let sleeper = Arc::new(RecordingSleeper::default());
            let up = uploader(FlakyStore::new(failures), false, sleeper.clone());
            let result = up
                .upload(Path::new("/tmp/x.mp4"), "x.mp4")
                .await
                .unwrap();
            assert_eq!(result.id, "abc");

            let sends = up.store.sends();
            assert_eq!(sends.len(), failures as usize + 1);
            assert_eq!(sends[0], 0);
            assert!(sends[1..].iter().all(|offset| *offset == ACKNOWLEDGED));
            assert_eq!(*up.store.sessions.lock().unwrap(), 1);

            let expected: Vec<Duration> = (1..=failures)
                .map(|n| Duration::from_secs(5 * u64::from(n)))
                .collect();
            assert_eq!(*sleeper.waits.lock().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn five_failures_is_upload_failed() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let up = uploader(FlakyStore::new(5), false, sleeper.clone());
        let err = up
            .upload(Path::new("/tmp/x.mp4"), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UploadFailed(_)));
        assert_eq!(up.store.sends().len(), 5);
        assert_eq!(sleeper.waits.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut store = FlakyStore::new(0);
        store.rejects_upload = true;
        let up = uploader(store, false, sleeper.clone());
        let err = up
            .upload(Path::new("/tmp/x.mp4"), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UploadFailed(_)));
        assert_eq!(up.store.sends().len(), 1);
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn folder_lookup_outage_is_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let store = FlakyStore::new(0);
        *store.folder_outages.lock().unwrap() = 1;
        let up = uploader(store, false, sleeper.clone());
        up.upload(Path::new("/tmp/x.mp4"), "x.mp4").await.unwrap();
        assert_eq!(*sleeper.waits.lock().unwrap(), vec![Duration::from_secs(5)]);
        assert_eq!(up.store.sends(), vec![0]);
    }

    #[tokio::test]
    async fn expired_session_starts_over() {
        let mut store = FlakyStore::new(1);
        store.sessions_expire = true;
        let up = uploader(store, false, Arc::new(RecordingSleeper::default()));
        up.upload(Path::new("/tmp/x.mp4"), "x.mp4").await.unwrap();
        assert_eq!(up.store.sends(), vec![0, 0]);
        assert_eq!(*up.store.sessions.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn unusable_folder_is_reported_before_uploading() {
        let mut store = FlakyStore::new(0);
        store.folder = FolderStatus::Missing;
        let up = uploader(store, false, Arc::new(RecordingSleeper::default()));
        let err = up
            .upload(Path::new("/tmp/x.mp4"), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::FolderUnavailable(_)));
        assert!(up.store.sends().is_empty());
        assert_eq!(*up.store.sessions.lock().unwrap(), 0);

        let mut store = FlakyStore::new(0);
        store.folder = FolderStatus::Trashed;
        let err = uploader(store, false, Arc::new(RecordingSleeper::default()))
            .upload(Path::new("/tmp/x.mp4"), "x.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UploadFailed(_)));
    }

    #[tokio::test]
    async fn permission_failure_does_not_fail_upload() {
        let mut store = FlakyStore::new(0);
        store.permission_fails = true;
        let up = uploader(store, true, Arc::new(RecordingSleeper::default()));
        let result = up
            .upload(Path::new("/tmp/x.mp4"), "x.mp4")
            .await
            .unwrap();
        assert_eq!(result.id, "abc");
        assert_eq!(*up.store.permissions.lock().unwrap(), vec!["abc".to_string()]);
    }

    #[tokio::test]
    async fn private_uploads_skip_permission() {
        let up = uploader(FlakyStore::new(0), false, Arc::new(RecordingSleeper::default()));
        up.upload(Path::new("/tmp/x.mp4"), "x.mp4").await.unwrap();
        assert!(up.store.permissions.lock().unwrap().is_empty());
    }
}
