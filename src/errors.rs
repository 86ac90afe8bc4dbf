#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Drive folder {0} is not accessible")]
    FolderUnavailable(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Transport error, 5xx or 429 from a remote service; worth retrying.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Sheet request failed: {0}")]
    SheetFailed(String),

    #[error("No sheet is configured")]
    SheetNotConfigured,

    #[error("Invalid credentials: {0}")]
    CredentialsInvalid(String),

    #[error("{0}")]
    Internal(String),
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Internal(format!("I/O error: {e}"))
    }
}

impl RelayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Unavailable(_))
    }

    /// Classifies a non-success HTTP status from a remote service.
    pub fn from_status(
        context: &str,
        status: reqwest::StatusCode,
        permanent: fn(String) -> RelayError,
    ) -> RelayError {
        let message = format!("{context} returned {status}");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            RelayError::Unavailable(message)
        } else {
            permanent(message)
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
