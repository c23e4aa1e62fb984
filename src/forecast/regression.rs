//! Ordinary least squares on a single regressor.

/// Fitted line `y = intercept + slope * x`, stored around the sample mean
/// of `x` so projections stay well-conditioned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTrend {
    pub slope: f64,
    pub mean_x: f64,
    pub mean_y: f64,
}

impl LinearTrend {
    /// Fit over `(x, y)` pairs. Returns `None` for an empty input. When every
    /// `x` is identical the slope is zero and the trend is the mean of `y`.
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            let dx = x - mean_x;
            (sxy + dx * (y - mean_y), sxx + dx * dx)
        });

        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        Some(Self { slope, mean_x, mean_y })
    }

    pub fn intercept(&self) -> f64 {
        self.mean_y - self.slope * self.mean_x
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.mean_y + self.slope * (x - self.mean_x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_line_projects_exactly() {
        let trend = LinearTrend::fit(&[(0.0, 100.0), (1.0, 120.0), (2.0, 140.0)]).unwrap();
        assert_eq!(trend.slope, 20.0);
        assert_eq!(trend.intercept(), 100.0);
        assert_eq!(trend.predict(3.0), 160.0);
    }

    #[test]
    fn test_noisy_fit() {
        // y = 2x + 1 with symmetric noise
        let pts = [(0.0, 1.5), (1.0, 2.5), (2.0, 5.5), (3.0, 6.5)];
        let trend = LinearTrend::fit(&pts).unwrap();
        assert!((trend.slope - 1.8).abs() < 1e-12);
        assert!((trend.intercept() - 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(LinearTrend::fit(&[]).is_none());

        let single = LinearTrend::fit(&[(5.0, 42.0)]).unwrap();
        assert_eq!(single.slope, 0.0);
        assert_eq!(single.predict(100.0), 42.0);

        let vertical = LinearTrend::fit(&[(1.0, 10.0), (1.0, 30.0)]).unwrap();
        assert_eq!(vertical.slope, 0.0);
        assert_eq!(vertical.predict(7.0), 20.0);
    }
}
