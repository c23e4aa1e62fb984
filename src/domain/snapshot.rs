use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::reading::Reading;

/// Battery outlook derived from the latest SOC movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outlook {
    NoData,
    Charging,
    Holding,
    DischargingAdequate,
    DischargingCritical,
}

impl Outlook {
    pub fn narrative(self) -> &'static str {
        match self {
            Outlook::NoData => "no data",
            Outlook::Charging => "charging",
            Outlook::Holding => "holding",
            Outlook::DischargingAdequate => "discharging - adequate",
            Outlook::DischargingCritical => "discharging - critical",
        }
    }
}

/// Short-horizon solar forecast computed from the rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// OLS projection of solar power one hour past the newest sample (W)
    pub linear_1h: f64,
    /// OLS projection two hours past the newest sample (W)
    pub linear_2h: f64,
    /// Exponentially weighted moving average of solar power (W)
    pub ewma: f64,
    /// Recency-weighted mean of solar power over the horizon (W)
    pub time_weighted: f64,
    /// OLS projection of load power one hour ahead (W)
    pub load_demand_1h: f64,
    /// 0-100, grows with sample count only
    pub confidence: f64,
    pub sample_count: usize,
    /// Fewer samples than the engine needs for full confidence
    pub degraded: bool,
    pub outlook: Outlook,
    pub narrative: String,
    /// Timestamp of the newest sample the forecast is based on
    pub basis_time: Option<DateTime<Utc>>,
}

impl Forecast {
    /// Forecast over an empty history: every figure zero, confidence zero
    pub fn empty() -> Self {
        Self {
            linear_1h: 0.0,
            linear_2h: 0.0,
            ewma: 0.0,
            time_weighted: 0.0,
            load_demand_1h: 0.0,
            confidence: 0.0,
            sample_count: 0,
            degraded: true,
            outlook: Outlook::NoData,
            narrative: Outlook::NoData.narrative().to_string(),
            basis_time: None,
        }
    }
}

/// Published, immutable view of the site.
///
/// A new `Snapshot` is built on every refresh and swapped in whole; readers
/// hold an `Arc<Snapshot>` and never see a partially-updated value.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub reading: Option<Arc<Reading>>,
    pub device_online: bool,
    /// Last refresh failed; `reading` is the last good one
    pub stale: bool,
    pub forecast: Option<Forecast>,
    pub last_success: Option<DateTime<Utc>>,
    pub published_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot before any successful fetch
    pub fn empty() -> Self {
        Self {
            reading: None,
            device_online: false,
            stale: false,
            forecast: None,
            last_success: None,
            published_at: Utc::now(),
        }
    }

    pub fn soc_percent(&self) -> Option<f64> {
        self.reading.as_ref().map(|r| r.battery.soc_percent)
    }

    /// Same snapshot with a different liveness flag
    pub fn with_device_online(&self, device_online: bool) -> Self {
        Self {
            device_online,
            published_at: Utc::now(),
            ..self.clone()
        }
    }
}
