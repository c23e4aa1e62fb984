use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::load::LoadId;

/// Grid operating mode reported alongside each reading
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString, strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GridMode {
    Solar,
    Battery,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolarReading {
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    /// Energy harvested over the trailing 24h (kWh)
    pub energy_24h_kwh: f64,
    /// Rough weekly estimate derived from the 24h figure (kWh)
    pub energy_7d_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub voltage_v: f64,
    pub current_a: f64,
    pub soc_percent: f64,
    pub soh_percent: f64,
    pub temperature_c: f64,
    pub charging: bool,
}

impl Default for BatteryReading {
    fn default() -> Self {
        Self {
            voltage_v: 0.0,
            current_a: 0.0,
            soc_percent: 0.0,
            soh_percent: 100.0,
            temperature_c: 25.0,
            charging: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReading {
    pub power_w: f64,
    pub current_a: f64,
    /// Last acknowledged on/off state per controllable load
    pub switches: BTreeMap<LoadId, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridReading {
    pub online: bool,
    pub power_w: f64,
    pub mode: GridMode,
}

impl Default for GridReading {
    fn default() -> Self {
        Self {
            online: true,
            power_w: 0.0,
            mode: GridMode::Hybrid,
        }
    }
}

/// One immutable telemetry sample from the monitored site.
///
/// Created once per upstream sample, shared as `Arc<Reading>` between the
/// history buffer and published snapshots, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub solar: SolarReading,
    pub battery: BatteryReading,
    pub load: LoadReading,
    pub grid: GridReading,
}

impl Reading {
    /// Empty reading at `timestamp`, used as a seed by tests and the simulator
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            solar: SolarReading::default(),
            battery: BatteryReading::default(),
            load: LoadReading::default(),
            grid: GridReading::default(),
        }
    }

    /// Force percentage channels into range. Out-of-range SOC/SOH from the
    /// device is clamped rather than rejected.
    pub fn clamped(mut self) -> Self {
        self.battery.soc_percent = clamp_percent(self.battery.soc_percent);
        self.battery.soh_percent = clamp_percent(self.battery.soh_percent);
        self
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_clamped_soc_and_soh() {
        let mut r = Reading::at(Utc::now());
        r.battery.soc_percent = 104.2;
        r.battery.soh_percent = -3.0;
        let r = r.clamped();
        assert_eq!(r.battery.soc_percent, 100.0);
        assert_eq!(r.battery.soh_percent, 0.0);
    }

    #[test]
    fn test_nan_soc_becomes_zero() {
        let mut r = Reading::at(Utc::now());
        r.battery.soc_percent = f64::NAN;
        assert_eq!(r.clamped().battery.soc_percent, 0.0);
    }

    #[test]
    fn test_grid_mode_parsing() {
        assert_eq!(GridMode::from_str("solar").unwrap(), GridMode::Solar);
        assert_eq!(GridMode::from_str("HYBRID").unwrap(), GridMode::Hybrid);
        assert!(GridMode::from_str("diesel").is_err());
        assert_eq!(GridMode::Battery.to_string(), "battery");
    }
}
