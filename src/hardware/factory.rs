use std::sync::Arc;

use super::{ActuationGateway, BlynkGateway, TelemetryProvider, ThingSpeakProvider};
use crate::config::{Config, HardwareMode};

/// Upstream collaborators the hub talks to
#[derive(Clone)]
pub struct Devices {
    pub provider: Arc<dyn TelemetryProvider>,
    pub gateway: Arc<dyn ActuationGateway>,
}

/// Builds the telemetry source and actuation target for the configured mode.
///
/// `Remote` talks to the ThingSpeak channel and the Blynk cloud. `Simulated`
/// is only available with the `sim` feature so a production build cannot
/// silently fall back to fake data.
pub struct DeviceFactory {
    mode: HardwareMode,
}

impl DeviceFactory {
    pub fn new(mode: HardwareMode) -> Self {
        Self { mode }
    }

    pub fn create(&self, cfg: &Config) -> anyhow::Result<Devices> {
        match self.mode {
            HardwareMode::Remote => {
                let provider = ThingSpeakProvider::new(&cfg.telemetry)?;
                let gateway = BlynkGateway::new(&cfg.actuation, &cfg.loads)?;
                tracing::info!(channel = %cfg.telemetry.channel_id, "using remote telemetry and actuation");
                Ok(Devices {
                    provider: Arc::new(provider),
                    gateway: Arc::new(gateway),
                })
            }
            #[cfg(feature = "sim")]
            HardwareMode::Simulated => {
                tracing::warn!("using simulated site - no real device is monitored or switched");
                let site = Arc::new(super::SimulatedSite::new(65.0));
                Ok(Devices {
                    provider: site.clone(),
                    gateway: site,
                })
            }
            #[cfg(not(feature = "sim"))]
            HardwareMode::Simulated => {
                anyhow::bail!("hardware.mode = \"simulated\" requires the `sim` feature")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_mode_requires_credentials() {
        let cfg = Config::default();
        assert!(DeviceFactory::new(HardwareMode::Remote).create(&cfg).is_err());
    }

    #[cfg(feature = "sim")]
    #[test]
    fn test_simulated_mode_builds() {
        let cfg = Config::default();
        assert!(DeviceFactory::new(HardwareMode::Simulated).create(&cfg).is_ok());
    }
}
