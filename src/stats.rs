//! Numeric helpers shared by the feature, pattern and model code.
//!
//! Sample statistics use the n - 1 denominator. Quantiles interpolate
//! linearly between order statistics.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, None below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    Some(variance.sqrt())
}

/// Quantile `q` in [0, 1] with linear interpolation, None for an empty slice
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Median, None for an empty slice
pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Pearson correlation; None when either side has no variance
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Ordinary least squares fit of y against x
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    /// Two-sided p-value for the null hypothesis slope = 0
    pub p_value: f64,
    pub std_err: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Fit `y = intercept + slope * x`; None below two points or with constant x
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    let (mx, my) = (mean(x), mean(y));
    let nf = n as f64;
    let ssxm = x.iter().map(|v| (v - mx).powi(2)).sum::<f64>() / nf;
    let ssym = y.iter().map(|v| (v - my).powi(2)).sum::<f64>() / nf;
    let ssxym = x
        .iter()
        .zip(y)
        .map(|(a, b)| (a - mx) * (b - my))
        .sum::<f64>()
        / nf;

    if ssxm <= 0.0 {
        return None;
    }

    if y.iter().all(|v| *v == y[0]) {
        return Some(LinearFit {
            slope: 0.0,
            intercept: y[0],
            r_value: 0.0,
            p_value: 1.0,
            std_err: 0.0,
        });
    }

    let r_value = if ssym <= 0.0 {
        0.0
    } else {
        (ssxym / (ssxm * ssym).sqrt()).clamp(-1.0, 1.0)
    };
    let slope = ssxym / ssxm;
    let intercept = my - slope * mx;

    let (p_value, std_err) = if n == 2 {
        (if r_value == 0.0 { 1.0 } else { 0.0 }, 0.0)
    } else {
        let df = nf - 2.0;
        let t = r_value * (df / ((1.0 - r_value) * (1.0 + r_value) + 1e-20)).sqrt();
        let p = match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
            Err(_) => 1.0,
        };
        let se = ((1.0 - r_value * r_value).max(0.0) * ssym / ssxm / df).sqrt();
        (p, se)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_value,
        p_value,
        std_err,
    })
}

/// Replace NaN and infinities with 0
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(sample_std(&[5.0]), None);
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((std - 2.138).abs() < 1e-3);
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert!((quantile(&values, 0.9).unwrap() - 3.7).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_pearson() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&x, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), None);
    }

    #[test]
    fn test_regression_perfect_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.1 + 0.02 * v).collect();
        let fit = linear_regression(&x, &y).unwrap();
        assert!((fit.slope - 0.02).abs() < 1e-12);
        assert!((fit.intercept - 0.1).abs() < 1e-12);
        assert!(fit.p_value < 1e-6);
        assert!((fit.predict(20.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_regression_constant_series() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = vec![0.2; 10];
        let fit = linear_regression(&x, &y).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r_value, 0.0);
        assert_eq!(fit.p_value, 1.0);
    }

    #[test]
    fn test_regression_noise_not_significant() {
        let x: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let y = [0.1, 0.3, 0.1, 0.3, 0.1, 0.3, 0.1, 0.3];
        let fit = linear_regression(&x, &y).unwrap();
        assert!(fit.p_value > 0.05);
    }
}
