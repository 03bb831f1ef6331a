//! Summary statistics over a batch of risk predictions

use crate::stats::{mean, median};
use crate::types::prediction::{PredictionResult, RiskCategory};
use serde::{Deserialize, Serialize};

/// Risk distribution across drivers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_drivers: usize,
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
    pub high_risk_pct: f64,
    pub avg_risk_score: f64,
    pub median_risk_score: f64,
    pub max_risk_score: f64,
    pub min_risk_score: f64,
}

impl RiskSummary {
    /// Summarise `predictions`; all zeros when empty
    pub fn from_predictions(predictions: &[PredictionResult]) -> Self {
        if predictions.is_empty() {
            return Self::default();
        }

        let scores: Vec<f64> = predictions.iter().map(|p| p.risk_score).collect();
        let count = |category| {
            predictions
                .iter()
                .filter(|p| p.risk_category == category)
                .count()
        };
        let high = count(RiskCategory::High);

        Self {
            total_drivers: predictions.len(),
            high_risk_count: high,
            medium_risk_count: count(RiskCategory::Medium),
            low_risk_count: count(RiskCategory::Low),
            high_risk_pct: round1(high as f64 / predictions.len() as f64 * 100.0),
            avg_risk_score: round1(mean(&scores)),
            median_risk_score: round1(median(&scores).unwrap_or(0.0)),
            max_risk_score: round1(scores.iter().copied().fold(f64::MIN, f64::max)),
            min_risk_score: round1(scores.iter().copied().fold(f64::MAX, f64::min)),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
