use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::errors::RelayError;
use crate::orchestrator::BatchSummary;
use crate::state::AppState;

/// Error body is always `{"detail": "..."}`.
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(RelayError::InvalidRequest(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

fn status_of(e: &RelayError) -> StatusCode {
    match e {
        RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RelayError::FolderUnavailable(_) | RelayError::SheetNotConfigured => StatusCode::NOT_FOUND,
        RelayError::ExtractionFailed(_)
        | RelayError::DownloadFailed(_)
        | RelayError::SheetFailed(_)
        | RelayError::Unavailable(_) => StatusCode::BAD_GATEWAY,
        RelayError::UploadFailed(_)
        | RelayError::CredentialsInvalid(_)
        | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::warn!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// `Json<T>` whose rejections use the `{"detail"}` shape.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(inner))
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SheetDownloadRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/download", post(download))
        .route("/download-from-sheet", post(download_from_sheet))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /download": "Download one video URL and upload it to Drive",
            "POST /download-from-sheet": "Process pending rows of the configured sheet",
        },
    }))
}

async fn download(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<DownloadRequest>,
) -> Result<Json<Value>, ApiError> {
    let _job = state.job_lock.lock().await;
    let (uploaded, filename) = state
        .orchestrator
        .process_one(&req.url, req.filename.as_deref())
        .await?;
    Ok(Json(json!({
        "status": "success",
        "filename": filename,
        "drive_response": uploaded,
    })))
}

async fn download_from_sheet(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<SheetDownloadRequest>,
) -> Result<Json<BatchSummary>, ApiError> {
    let _job = state.job_lock.lock().await;
    let summary = state.orchestrator.process_rows(req.limit).await?;
    log::info!("Sheet batch processed {} rows", summary.count);
    Ok(Json(summary))
}
