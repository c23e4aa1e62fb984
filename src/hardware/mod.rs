pub mod blynk;
pub mod factory;
#[cfg(feature = "sim")]
pub mod sim;
pub mod thingspeak;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::domain::LoadId;

pub use blynk::BlynkGateway;
pub use factory::{DeviceFactory, Devices};
#[cfg(feature = "sim")]
pub use sim::SimulatedSite;
pub use thingspeak::ThingSpeakProvider;

/// Raw channel values of one upstream sample, before derivation into a `Reading`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSample {
    pub timestamp: DateTime<Utc>,
    pub battery_voltage_v: f64,
    pub battery_current_a: f64,
    pub battery_soc_percent: f64,
    pub battery_temperature_c: Option<f64>,
    pub solar_voltage_v: f64,
    pub solar_current_a: f64,
    pub load_power_w: f64,
    pub load_current_a: f64,
}

impl DeviceSample {
    pub fn solar_power_w(&self) -> f64 {
        self.solar_voltage_v * self.solar_current_a
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telemetry provider returned HTTP {0}")]
    Status(u16),
    #[error("telemetry payload could not be decoded: {0}")]
    Decode(String),
    #[error("telemetry provider not configured: {0}")]
    NotConfigured(&'static str),
    #[error("telemetry fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("actuation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("actuation cloud rejected write with HTTP {0}")]
    Rejected(u16),
    #[error("no pin configured for load {0}")]
    UnknownPin(LoadId),
    #[error("actuation gateway not configured")]
    NotConfigured,
    #[error("actuation timed out after {0:?}")]
    Timeout(Duration),
}

/// Pull-style source of device telemetry
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    /// Up to `results` most recent samples, in any order
    async fn fetch_batch(&self, results: u32) -> Result<Vec<DeviceSample>, UpstreamError>;
}

/// Remote switch write with fire-and-acknowledge semantics
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActuationGateway: Send + Sync {
    async fn write(&self, load: LoadId, on: bool) -> Result<(), ActuationError>;

    /// Current relay state if the device reports one
    async fn read(&self, load: LoadId) -> Result<Option<bool>, ActuationError>;
}

/// Lenient numeric parse for channel fields: missing or garbage reads as `default`
pub(crate) fn parse_channel(value: Option<&str>, default: f64) -> f64 {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
