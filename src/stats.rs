//! Population statistics and least-squares fits over small, ordered series.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation dividing by N, not N - 1.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = mean(values);
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Ordinary least squares of `values[i]` against `i`. Needs two points.
pub fn linear_trend(values: &[f64]) -> Option<Trend> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let (covariance, x_variance) = values.iter().enumerate().fold(
        (0.0, 0.0),
        |(covariance, x_variance), (index, value)| {
            let dx = index as f64 - x_mean;
            (covariance + dx * (value - y_mean), x_variance + dx * dx)
        },
    );

    let slope = covariance / x_variance;
    Some(Trend {
        slope,
        intercept: y_mean - slope * x_mean,
    })
}
