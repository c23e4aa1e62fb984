use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::PI;

use super::{ActuationError, ActuationGateway, DeviceSample, TelemetryProvider, UpstreamError};
use crate::domain::LoadId;

const MAX_SAMPLES: usize = 288;
const BATTERY_CAPACITY_WH: f64 = 1200.0;
const PANEL_PEAK_W: f64 = 600.0;
const BASE_LOAD_W: f64 = 60.0;

/// Simulated off-grid site: a diurnal solar curve, a small battery and three
/// relays. Serves as both telemetry source and actuation target.
#[derive(Debug)]
pub struct SimulatedSite {
    state: Mutex<SimState>,
    /// Add ±1% noise to reported channels
    pub simulate_noise: bool,
}

#[derive(Debug)]
struct SimState {
    soc_percent: f64,
    last_step: Option<DateTime<Utc>>,
    relays: BTreeMap<LoadId, bool>,
    samples: VecDeque<DeviceSample>,
}

impl SimulatedSite {
    pub fn new(initial_soc_percent: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                soc_percent: initial_soc_percent.clamp(0.0, 100.0),
                last_step: None,
                relays: BTreeMap::new(),
                samples: VecDeque::with_capacity(MAX_SAMPLES),
            }),
            simulate_noise: true,
        }
    }

    fn relay_load_w(relays: &BTreeMap<LoadId, bool>) -> f64 {
        relays
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| match id {
                LoadId::Light => 40.0,
                LoadId::Fan => 25.0,
                LoadId::Pump => 120.0,
            })
            .sum()
    }

    fn solar_w(now: DateTime<Utc>) -> f64 {
        let hour = now.hour() as f64 + now.minute() as f64 / 60.0;
        if !(6.0..18.0).contains(&hour) {
            return 0.0;
        }
        PANEL_PEAK_W * ((hour - 6.0) / 12.0 * PI).sin()
    }

    fn noisy(&self, value: f64) -> f64 {
        if !self.simulate_noise {
            return value;
        }
        value * (1.0 + rand::thread_rng().gen_range(-0.01..0.01))
    }

    /// Advance the battery model to `now` and record a sample
    fn step(&self, now: DateTime<Utc>) {
        let mut st = self.state.lock();
        let solar_w = Self::solar_w(now);
        let load_w = BASE_LOAD_W + Self::relay_load_w(&st.relays);

        if let Some(prev) = st.last_step {
            let dt_h = (now - prev).num_milliseconds().max(0) as f64 / 3_600_000.0;
            let delta = (solar_w - load_w) * dt_h / BATTERY_CAPACITY_WH * 100.0;
            st.soc_percent = (st.soc_percent + delta).clamp(0.0, 100.0);
        }
        st.last_step = Some(now);

        let battery_v = 11.8 + st.soc_percent / 100.0 * 1.6;
        let net_w = solar_w - load_w;
        let sample = DeviceSample {
            timestamp: now,
            battery_voltage_v: self.noisy(battery_v),
            battery_current_a: self.noisy(net_w / battery_v),
            battery_soc_percent: st.soc_percent,
            battery_temperature_c: Some(self.noisy(27.5)),
            solar_voltage_v: if solar_w > 0.0 { self.noisy(18.0) } else { 0.0 },
            solar_current_a: self.noisy(solar_w / 18.0),
            load_power_w: self.noisy(load_w),
            load_current_a: self.noisy(load_w / battery_v),
        };
        if st.samples.len() == MAX_SAMPLES {
            st.samples.pop_front();
        }
        st.samples.push_back(sample);
    }
}

#[async_trait]
impl TelemetryProvider for SimulatedSite {
    async fn fetch_batch(&self, results: u32) -> Result<Vec<DeviceSample>, UpstreamError> {
        self.step(Utc::now());
        let st = self.state.lock();
        let skip = st.samples.len().saturating_sub(results as usize);
        Ok(st.samples.iter().skip(skip).cloned().collect())
    }
}

#[async_trait]
impl ActuationGateway for SimulatedSite {
    async fn write(&self, load: LoadId, on: bool) -> Result<(), ActuationError> {
        self.state.lock().relays.insert(load, on);
        Ok(())
    }

    async fn read(&self, load: LoadId) -> Result<Option<bool>, ActuationError> {
        Ok(Some(self.state.lock().relays.get(&load).copied().unwrap_or(false)))
    }
}
