use crate::config::DecayKernel;

/// Exponentially weighted moving average, updated one sample at a time.
///
/// Undefined until the first sample, which seeds it directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl DecayKernel {
    /// Weight of a sample `age_hours` old inside a `horizon_hours` window.
    /// Zero at or beyond the horizon.
    pub fn weight(&self, age_hours: f64, horizon_hours: f64) -> f64 {
        if age_hours < 0.0 || age_hours >= horizon_hours {
            return 0.0;
        }
        match *self {
            DecayKernel::Linear => 1.0 - age_hours / horizon_hours,
            DecayKernel::Exponential { half_life_hours } => {
                0.5f64.powf(age_hours / half_life_hours.max(f64::EPSILON))
            }
        }
    }
}

/// Recency-weighted mean of `(age_hours, value)` samples, normalized by total
/// weight. Samples outside the horizon carry no weight.
pub fn time_weighted_average(
    samples: &[(f64, f64)],
    horizon_hours: f64,
    kernel: DecayKernel,
) -> Option<f64> {
    let (weighted, total) = samples
        .iter()
        .fold((0.0, 0.0), |(weighted, total), (age, value)| {
            let w = kernel.weight(*age, horizon_hours);
            (weighted + w * value, total + w)
        });
    (total > 0.0).then(|| weighted / total)
}
