//! HTTP implementation of `EmonApi` for an Emoncms instance.

use std::time::Duration;

use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::account::AccountIdentity;
use crate::models::{Dashboard, DataPoint, DateRange};

use super::{ApiError, EmonApi};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on samples requested for one feed and range.
/// Enough for a phone-width chart without pulling a year of 10 s data.
const MAX_POINTS: i64 = 800;

/// Smallest interval Emoncms stores feeds at.
const MIN_INTERVAL_SECS: i64 = 10;

/// Error body Emoncms sends with a 200 status.
#[derive(Debug, Deserialize)]
struct FailureResponse {
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DashboardResponse {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl DashboardResponse {
    fn into_dashboard(self) -> Result<Dashboard, ApiError> {
        let id = match self.id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ApiError::InvalidResponse(format!(
                    "Unexpected dashboard id: {}",
                    other
                )))
            }
        };
        Ok(Dashboard {
            id,
            name: self.name.unwrap_or_default(),
            alias: self.alias.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
        })
    }
}

/// Emoncms client bound to one account's URL and API key.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpEmonApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpEmonApi {
    pub fn new(identity: &AccountIdentity) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: identity.endpoint_url().trim_end_matches('/').to_string(),
            api_key: identity.api_key().to_string(),
        })
    }

    /// Sampling interval so that `range` yields at most `MAX_POINTS` samples.
    fn interval_for(range: &DateRange) -> i64 {
        (range.duration().num_seconds() / MAX_POINTS).max(MIN_INTERVAL_SECS)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let body = response.text().await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))?;
        Self::check_failure(&value)?;
        Ok(value)
    }

    /// Emoncms reports failures as `{"success": false, "message": ...}` with status 200.
    fn check_failure(value: &Value) -> Result<(), ApiError> {
        if !value.is_object() {
            return Ok(());
        }
        match serde_json::from_value::<FailureResponse>(value.clone()) {
            Ok(failure) if !failure.success => {
                let lower = failure.message.to_lowercase();
                if lower.contains("username or password") || lower.contains("apikey") {
                    Err(ApiError::Unauthorized)
                } else {
                    Err(ApiError::Rejected(failure.message))
                }
            }
            _ => Ok(()),
        }
    }

    /// Parse `[[time_ms, value], ...]`, skipping samples with no value.
    fn parse_feed_data(value: Value) -> Result<Vec<DataPoint>, ApiError> {
        let rows: Vec<(i64, Option<f64>)> = serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("feed data: {}", e)))?;

        let mut points = Vec::with_capacity(rows.len());
        for (time_ms, value) in rows {
            let Some(value) = value else { continue };
            let time = DateTime::from_timestamp_millis(time_ms).ok_or_else(|| {
                ApiError::InvalidResponse(format!("Timestamp out of range: {}", time_ms))
            })?;
            points.push(DataPoint::new(time, value));
        }
        Ok(points)
    }

    fn parse_dashboards(value: Value) -> Result<Vec<Dashboard>, ApiError> {
        let rows: Vec<DashboardResponse> = serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("dashboard list: {}", e)))?;
        rows.into_iter().map(DashboardResponse::into_dashboard).collect()
    }
}

impl EmonApi for HttpEmonApi {
    async fn fetch_feed_data(
        &self,
        feed_id: &str,
        range: &DateRange,
    ) -> Result<Vec<DataPoint>, ApiError> {
        let query = [
            ("id", feed_id.to_string()),
            ("start", range.start().timestamp_millis().to_string()),
            ("end", range.end().timestamp_millis().to_string()),
            ("interval", Self::interval_for(range).to_string()),
            ("skipmissing", "1".to_string()),
            ("limitinterval", "1".to_string()),
        ];
        let value = self.get_json("feed/data.json", &query).await?;
        Self::parse_feed_data(value)
    }

    async fn fetch_dashboards(&self) -> Result<Vec<Dashboard>, ApiError> {
        let value = self.get_json("dashboard/list.json", &[]).await?;
        Self::parse_dashboards(value)
    }
}
