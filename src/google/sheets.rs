use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{RelayError, RelayResult};
use crate::google::auth::TokenProvider;
use crate::sheet::RowStore;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct SheetsClient {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    api_base: String,
    sheet_id: String,
}

impl SheetsClient {
    pub fn new(
        tokens: Arc<TokenProvider>,
        sheet_id: String,
        timeout: Duration,
    ) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("cannot build Sheets client: {e}")))?;
        Ok(Self {
            http,
            tokens,
            api_base: SHEETS_API_BASE.to_string(),
            sheet_id,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, range: &str) -> RelayResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| RelayError::Internal(format!("bad Sheets base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RelayError::Internal("Sheets base URL cannot have a path".to_string()))?
            .extend(["spreadsheets", self.sheet_id.as_str(), "values", range]);
        Ok(url)
    }
}

#[async_trait]
impl RowStore for SheetsClient {
    async fn read_range(&self, range: &str) -> RelayResult<Vec<Vec<String>>> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .get(self.values_url(range)?)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| RelayError::SheetFailed(format!("read {range}: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError::SheetFailed(format!(
                "read {range} returned {}",
                resp.status()
            )));
        }
        let body: ValueRange = resp
            .json()
            .await
            .map_err(|e| RelayError::SheetFailed(format!("bad values response: {e}")))?;
        Ok(body
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn write_range(&self, range: &str, values: Vec<Vec<String>>) -> RelayResult<()> {
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .put(self.values_url(range)?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&token)
            .json(&serde_json::json!({ "range": range, "values": values }))
            .send()
            .await
            .map_err(|e| RelayError::SheetFailed(format!("write {range}: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(RelayError::SheetFailed(format!(
                "write {range} returned {}",
                resp.status()
            )))
        }
    }
}
