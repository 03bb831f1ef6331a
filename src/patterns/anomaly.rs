use super::types::{AnomalyMethod, AnomalyResult, AnomalyType};
use super::PatternAnalyzer;
use crate::feature_engineer::FeatureTable;
use crate::stats::{mean, quantile, sample_std};
use rayon::prelude::*;
use tracing::debug;

const TOP_FEATURES: usize = 3;

/// Population mean and sample std of one column
struct ColumnStats {
    mean: f64,
    std: f64,
}

impl PatternAnalyzer {
    /// Drivers whose mean absolute z-score across features is extreme.
    ///
    /// Columns without variance are ignored. Needs `anomaly_min_rows` rows;
    /// a contamination of 0 never flags anyone. Results are sorted by
    /// deviation score, highest first.
    pub fn detect_anomalies(&self, features: &FeatureTable, method: AnomalyMethod) -> Vec<AnomalyResult> {
        if features.len() < self.config.anomaly_min_rows {
            debug!(
                rows = features.len(),
                required = self.config.anomaly_min_rows,
                "Too few rows for anomaly detection"
            );
            return Vec::new();
        }

        // global pass: per-column population statistics
        let columns: Vec<Option<ColumnStats>> = features
            .columns()
            .iter()
            .map(|name| {
                let values = features.column(name).unwrap_or_default();
                let std = sample_std(&values).unwrap_or(0.0);
                (std > 0.0 && std.is_finite()).then(|| ColumnStats {
                    mean: mean(&values),
                    std,
                })
            })
            .collect();
        if columns.iter().all(Option::is_none) {
            return Vec::new();
        }

        let z_rows: Vec<Vec<Option<f64>>> = features
            .iter()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|(_, values)| {
                values
                    .iter()
                    .zip(&columns)
                    .map(|(v, stats)| stats.as_ref().map(|s| ((v - s.mean) / s.std).abs()))
                    .collect()
            })
            .collect();
        let scores: Vec<f64> = z_rows
            .iter()
            .map(|z| mean(&z.iter().flatten().copied().collect::<Vec<_>>()))
            .collect();

        let threshold = match method {
            AnomalyMethod::Contamination(fraction) => {
                if fraction <= 0.0 {
                    return Vec::new();
                }
                quantile(&scores, 1.0 - fraction).unwrap_or(f64::INFINITY)
            }
            AnomalyMethod::Sigma(sigma) => sigma,
        };

        let headline = features.column(&self.config.headline_feature);
        let (rate_mean, rate_std) = match &headline {
            Some(rates) => (mean(rates), sample_std(rates).unwrap_or(0.0)),
            None => (0.0, 0.01),
        };

        let mut results: Vec<AnomalyResult> = features
            .index()
            .iter()
            .enumerate()
            .filter(|&(i, _)| scores[i] > threshold)
            .map(|(i, driver_id)| {
                let rate = headline.as_ref().map_or(0.0, |r| r[i]);
                let mut ranked: Vec<(String, f64)> = features
                    .columns()
                    .iter()
                    .zip(&z_rows[i])
                    .filter_map(|(name, z)| z.map(|z| (name.clone(), z)))
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ranked.truncate(TOP_FEATURES);

                AnomalyResult {
                    driver_id: driver_id.clone(),
                    anomaly_type: if rate > rate_mean {
                        AnomalyType::Spike
                    } else {
                        AnomalyType::Drop
                    },
                    deviation_score: scores[i],
                    threshold,
                    expected_range: (
                        (rate_mean - 2.0 * rate_std).max(0.0),
                        rate_mean + 2.0 * rate_std,
                    ),
                    actual_value: rate,
                    top_features: ranked,
                    description: format!(
                        "Driver {} shows unusual behaviour (score: {:.2})",
                        driver_id, scores[i]
                    ),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.deviation_score
                .total_cmp(&a.deviation_score)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        results
    }
}
