//! HTTP client for the appliance backend.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};

use super::ReadingSource;
use crate::models::SensorReading;

// ---

/// Thin wrapper over `reqwest` bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct BackendClient {
    // ---
    http: Client,
    base_url: String,
}

impl BackendClient {
    // ---
    /// Build a client for the backend at `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - Backend origin, with or without a trailing slash
    /// * `timeout` - Whole-request timeout applied to every call
    ///
    /// # Errors
    /// Returns an error if the underlying `reqwest` client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL for `path` on this backend.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET /sensor-data`: the latest reading with fish counts.
    ///
    /// # Returns
    /// The newest row the backend holds, parsed into a [`SensorReading`].
    ///
    /// # Errors
    /// Transport failures, non-2xx statuses (including the backend's 404
    /// "No data available") and bodies that do not parse as a reading.
    pub async fn latest_reading(&self) -> Result<SensorReading> {
        // ---
        let url = self.url("/sensor-data");
        tracing::debug!("Fetching latest reading from {}", url);

        let reading = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json::<SensorReading>()
            .await
            .with_context(|| format!("Malformed reading from {url}"))?;
        Ok(reading)
    }

    /// `GET /data?page=1&per_page=N`: the most recent persisted rows.
    ///
    /// # Returns
    /// Up to `per_page` readings, newest first as the backend orders them.
    /// A 404 means the backend has no rows yet and yields an empty list.
    /// Rows that fail to parse are skipped and logged at `debug`.
    ///
    /// # Errors
    /// Transport failures, non-2xx statuses other than 404, and a body that
    /// is not a JSON array.
    pub async fn recent_readings(&self, per_page: u32) -> Result<Vec<SensorReading>> {
        // ---
        let url = self.url("/data");
        tracing::debug!("Fetching {} recent rows from {}", per_page, url);

        let response = self
            .http
            .get(&url)
            .query(&[("page", 1), ("per_page", per_page)])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .await?;

        // Rows that fail to parse are skipped, not fatal.
        let rows = body
            .as_array()
            .ok_or_else(|| anyhow!("Expected an array of rows from {url}"))?;
        let readings: Vec<SensorReading> = rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| match serde_json::from_value(row.clone()) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    tracing::debug!("Skipping row {}: {} - Raw row: {}", i, e, row);
                    None
                }
            })
            .collect();

        tracing::info!("Fetched {} of {} recent rows", readings.len(), rows.len());
        Ok(readings)
    }
}

impl ReadingSource for BackendClient {
    fn fetch(&self) -> impl Future<Output = Result<SensorReading>> + Send {
        self.latest_reading()
    }
}
