use std::sync::Arc;

use super::{regression::LinearTrend, smoothing::{time_weighted_average, Ewma}};
use crate::config::ForecastConfig;
use crate::domain::{Forecast, Outlook, Reading};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Computes the short-horizon forecast from a window of history.
///
/// Pure and deterministic: the only notion of time is the sample timestamps,
/// so the same ordered window always yields the same `Forecast`.
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    cfg: ForecastConfig,
}

impl ForecastEngine {
    pub fn new(cfg: ForecastConfig) -> Self {
        Self { cfg }
    }

    /// Number of trailing history samples the engine wants
    pub fn window(&self) -> usize {
        self.cfg.window
    }

    /// Smoother for a running solar EWMA kept across refreshes
    pub fn ewma(&self) -> Ewma {
        Ewma::new(self.cfg.ewma_alpha)
    }

    /// Forecast with the EWMA seeded from the first sample of `window`
    pub fn compute(&self, window: &[Arc<Reading>]) -> Forecast {
        self.compute_with(window, None)
    }

    /// Forecast using `running_ewma` when the caller maintains one
    pub fn compute_with(&self, window: &[Arc<Reading>], running_ewma: Option<f64>) -> Forecast {
        let (first, newest) = match (window.first(), window.last()) {
            (Some(first), Some(newest)) => (first, newest),
            _ => return Forecast::empty(),
        };

        let elapsed_h = |r: &Reading| {
            (r.timestamp - first.timestamp).num_milliseconds() as f64 / MS_PER_HOUR
        };
        let basis_h = elapsed_h(newest);

        let solar: Vec<(f64, f64)> = window.iter().map(|r| (elapsed_h(r), r.solar.power_w)).collect();
        let load: Vec<(f64, f64)> = window.iter().map(|r| (elapsed_h(r), r.load.power_w)).collect();

        let project = |points: &[(f64, f64)], hours_ahead: f64| {
            LinearTrend::fit(points)
                .map(|t| t.predict(basis_h + hours_ahead).max(0.0))
                .unwrap_or(0.0)
        };

        let ewma = running_ewma.unwrap_or_else(|| {
            let mut ewma = self.ewma();
            for (_, power) in &solar {
                ewma.update(*power);
            }
            ewma.value().unwrap_or(0.0)
        });

        let aged: Vec<(f64, f64)> = solar.iter().map(|(h, p)| (basis_h - h, *p)).collect();
        let time_weighted =
            time_weighted_average(&aged, self.cfg.horizon_hours, self.cfg.decay).unwrap_or(0.0);

        let count = window.len();
        let outlook = self.outlook(window);

        Forecast {
            linear_1h: project(&solar, 1.0),
            linear_2h: project(&solar, 2.0),
            ewma,
            time_weighted,
            load_demand_1h: project(&load, 1.0),
            confidence: confidence(count, self.cfg.required_samples),
            sample_count: count,
            degraded: count < self.cfg.required_samples,
            outlook,
            narrative: outlook.narrative().to_string(),
            basis_time: Some(newest.timestamp),
        }
    }

    /// Classify from the SOC step between the two newest readings and the
    /// current SOC. A single reading has no step and counts as holding. A
    /// discharge is critical when SOC is low or the step is at least
    /// `fast_discharge_percent`.
    fn outlook(&self, window: &[Arc<Reading>]) -> Outlook {
        let Some(newest) = window.last() else {
            return Outlook::NoData;
        };
        let soc = newest.battery.soc_percent;
        let delta = match window.len() {
            n if n >= 2 => soc - window[n - 2].battery.soc_percent,
            _ => 0.0,
        };

        if delta > 0.0 {
            Outlook::Charging
        } else if delta == 0.0 {
            Outlook::Holding
        } else if soc < self.cfg.critical_soc_percent || -delta >= self.cfg.fast_discharge_percent {
            Outlook::DischargingCritical
        } else {
            Outlook::DischargingAdequate
        }
    }
}

/// Grows linearly with sample count up to 100 at `required`
pub fn confidence(count: usize, required: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (100.0 * count as f64 / required.max(1) as f64).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap()
    }

    fn sample(minutes: i64, solar_w: f64, soc: f64) -> Arc<Reading> {
        let mut r = Reading::at(t0() + Duration::minutes(minutes));
        r.solar.power_w = solar_w;
        r.load.power_w = 80.0;
        r.battery.soc_percent = soc;
        Arc::new(r)
    }

    fn engine() -> ForecastEngine {
        ForecastEngine::new(ForecastConfig::default())
    }

    #[test]
    fn test_empty_window_is_zero_not_error() {
        let f = engine().compute(&[]);
        assert_eq!(f, Forecast::empty());
        assert_eq!(f.confidence, 0.0);
        assert_eq!(f.outlook, Outlook::NoData);
    }

    #[test]
    fn test_linear_series_projects_exactly() {
        let window = [sample(0, 100.0, 50.0), sample(60, 120.0, 50.0), sample(120, 140.0, 50.0)];
        let f = engine().compute(&window);
        assert_eq!(f.linear_1h, 160.0);
        assert_eq!(f.linear_2h, 180.0);
        assert_eq!(f.load_demand_1h, 80.0);
        assert_eq!(f.basis_time, Some(t0() + Duration::minutes(120)));
    }

    #[test]
    fn test_negative_projection_clamps_to_zero() {
        let window = [sample(0, 300.0, 50.0), sample(60, 150.0, 50.0), sample(120, 10.0, 50.0)];
        let f = engine().compute(&window);
        assert_eq!(f.linear_1h, 0.0);
        assert_eq!(f.linear_2h, 0.0);
    }

    #[test]
    fn test_confidence_grows_with_samples_only() {
        assert_eq!(confidence(0, 50), 0.0);
        assert_eq!(confidence(25, 50), 50.0);
        assert_eq!(confidence(50, 50), 100.0);
        assert_eq!(confidence(500, 50), 100.0);

        let f = engine().compute(&[sample(0, 1.0, 50.0), sample(5, 900.0, 50.0)]);
        assert_eq!(f.confidence, 4.0);
        assert!(f.degraded);
    }

    #[test]
    fn test_time_weighted_ignores_samples_beyond_horizon() {
        let mut cfg = ForecastConfig::default();
        cfg.horizon_hours = 1.0;
        let window = [sample(0, 5000.0, 50.0), sample(120, 200.0, 50.0), sample(150, 100.0, 50.0)];
        let f = ForecastEngine::new(cfg).compute(&window);
        // ages 2.5h (excluded), 0.5h (w=0.5), 0h (w=1)
        assert!((f.time_weighted - (0.5 * 200.0 + 100.0) / 1.5).abs() < 1e-9);
    }

    #[rstest]
    #[case(40.0, 42.0, Outlook::Charging)]
    #[case(42.0, 42.0, Outlook::Holding)]
    #[case(60.0, 57.0, Outlook::DischargingAdequate)]
    #[case(60.0, 55.0, Outlook::DischargingCritical)]
    #[case(80.0, 72.0, Outlook::DischargingCritical)]
    #[case(21.0, 19.5, Outlook::DischargingCritical)]
    fn test_outlook_classification(#[case] prev: f64, #[case] now: f64, #[case] expected: Outlook) {
        let f = engine().compute(&[sample(0, 0.0, prev), sample(10, 0.0, now)]);
        assert_eq!(f.outlook, expected);
        assert_eq!(f.narrative, expected.narrative());
    }

    proptest! {
        #[test]
        fn prop_forecast_is_reproducible(powers in proptest::collection::vec(0.0f64..5000.0, 1..60)) {
            let window: Vec<_> = powers
                .iter()
                .enumerate()
                .map(|(i, p)| sample(i as i64 * 7, *p, 50.0))
                .collect();
            let a = engine().compute(&window);
            let b = engine().compute(&window);
            prop_assert_eq!(a.linear_1h.to_bits(), b.linear_1h.to_bits());
            prop_assert_eq!(a.linear_2h.to_bits(), b.linear_2h.to_bits());
            prop_assert_eq!(a.ewma.to_bits(), b.ewma.to_bits());
            prop_assert_eq!(a.time_weighted.to_bits(), b.time_weighted.to_bits());
            prop_assert!(a.linear_1h >= 0.0 && a.linear_2h >= 0.0);
            prop_assert!(a.confidence >= 0.0 && a.confidence <= 100.0);
        }
    }
}
