//! Spreadsheet intake over the Google Sheets v4 values API.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::gate::RawRecord;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("invalid sheets API URL: {0}")]
    InvalidUrl(String),

    #[error("sheets API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("sheets request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl SheetError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SheetError::Status { status, .. } => *status == 429 || *status >= 500,
            SheetError::Http(e) => !e.is_decode(),
            SheetError::InvalidUrl(_) => false,
        }
    }
}

/// Source of raw rows for a run.
pub trait SheetReader {
    /// Header row becomes the record keys. Rows without any non-empty cell
    /// are skipped.
    fn read_rows(
        &self,
        sheet_id: &str,
        range: &str,
    ) -> impl Future<Output = Result<Vec<RawRecord>, SheetError>>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct GoogleSheetsClient {
    http: Client,
    token: String,
    base_url: String,
}

impl GoogleSheetsClient {
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self, SheetError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.into(),
        })
    }

    fn values_url(&self, sheet_id: &str, range: &str) -> Result<Url, SheetError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| SheetError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", sheet_id, "values", range]);
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE");
        Ok(url)
    }
}

impl SheetReader for GoogleSheetsClient {
    async fn read_rows(&self, sheet_id: &str, range: &str) -> Result<Vec<RawRecord>, SheetError> {
        let url = self.values_url(sheet_id, range)?;
        debug!(sheet_id, range, "reading spreadsheet values");

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SheetError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<ValueRange>().await?;
        let records = rows_to_records(body.values);
        debug!(sheet_id, rows = records.len(), "spreadsheet rows read");
        Ok(records)
    }
}

fn is_blank(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn header_name(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Zip each data row with the header. Short rows are padded with empty
/// strings and columns with a blank header are dropped.
pub fn rows_to_records(mut rows: Vec<Vec<Value>>) -> Vec<RawRecord> {
    if rows.is_empty() {
        return Vec::new();
    }
    let header: Vec<String> = rows.remove(0).iter().map(header_name).collect();

    rows.into_iter()
        .filter(|row| !row.iter().all(is_blank))
        .map(|row| {
            header
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(i, name)| {
                    let cell = row.get(i).cloned().unwrap_or_else(|| Value::String(String::new()));
                    (name.clone(), cell)
                })
                .collect()
        })
        .collect()
}
