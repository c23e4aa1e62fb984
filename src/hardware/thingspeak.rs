use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{parse_channel, DeviceSample, TelemetryProvider, UpstreamError};
use crate::config::TelemetryConfig;

/// ThingSpeak channel feed client.
///
/// Channel layout: field1 battery V, field2 battery A, field3 SOC %,
/// field4 battery temperature, field5 solar V, field6 solar A,
/// field7 load W, field8 load A.
#[derive(Clone)]
pub struct ThingSpeakProvider {
    base_url: String,
    channel_id: String,
    read_key: String,
    client: reqwest::Client,
}

impl ThingSpeakProvider {
    pub fn new(cfg: &TelemetryConfig) -> Result<Self, UpstreamError> {
        if cfg.channel_id.is_empty() {
            return Err(UpstreamError::NotConfigured("telemetry.channel_id"));
        }
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("solar-telemetry-hub/0.2"));
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout().max(Duration::from_millis(100)))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url: cfg.base_url.clone(),
            channel_id: cfg.channel_id.clone(),
            read_key: cfg.read_key.clone(),
            client,
        })
    }

    fn feeds_url(&self) -> String {
        format!(
            "{}/channels/{}/feeds.json",
            self.base_url.trim_end_matches('/'),
            self.channel_id
        )
    }
}

#[async_trait]
impl TelemetryProvider for ThingSpeakProvider {
    async fn fetch_batch(&self, results: u32) -> Result<Vec<DeviceSample>, UpstreamError> {
        let mut req = self.client.get(self.feeds_url()).query(&[("results", results.to_string())]);
        if !self.read_key.is_empty() {
            req = req.query(&[("api_key", self.read_key.as_str())]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }
        let body: FeedResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        let samples: Vec<DeviceSample> = body.feeds.into_iter().filter_map(RawFeed::into_sample).collect();
        debug!(count = samples.len(), "fetched channel feed");
        Ok(samples)
    }
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    feeds: Vec<RawFeed>,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    created_at: Option<DateTime<Utc>>,
    field1: Option<String>,
    field2: Option<String>,
    field3: Option<String>,
    field4: Option<String>,
    field5: Option<String>,
    field6: Option<String>,
    field7: Option<String>,
    field8: Option<String>,
}

impl RawFeed {
    /// Entries without a timestamp cannot be placed in history and are skipped
    fn into_sample(self) -> Option<DeviceSample> {
        let timestamp = self.created_at?;
        let temperature = self.field4.as_deref().map(|v| parse_channel(Some(v), 25.0));
        Some(DeviceSample {
            timestamp,
            battery_voltage_v: parse_channel(self.field1.as_deref(), 0.0),
            battery_current_a: parse_channel(self.field2.as_deref(), 0.0),
            battery_soc_percent: parse_channel(self.field3.as_deref(), 0.0),
            battery_temperature_c: temperature,
            solar_voltage_v: parse_channel(self.field5.as_deref(), 0.0),
            solar_current_a: parse_channel(self.field6.as_deref(), 0.0),
            load_power_w: parse_channel(self.field7.as_deref(), 0.0),
            load_current_a: parse_channel(self.field8.as_deref(), 0.0),
        })
    }
}
