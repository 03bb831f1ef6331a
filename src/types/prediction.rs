//! Risk prediction data structures

use serde::{Deserialize, Serialize};

/// Risk category classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    /// Determine risk category from a 0-100 score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskThresholds) -> Self {
        if score >= thresholds.high {
            RiskCategory::High
        } else if score >= thresholds.medium {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
        }
    }
}

/// Score cut-offs for risk categories (0-100 scale)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 40.0,
            high: 70.0,
        }
    }
}

/// Whether a factor pushes the prediction up or down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorDirection {
    #[serde(rename = "increases risk")]
    Increases,
    #[serde(rename = "decreases risk")]
    Decreases,
}

impl FactorDirection {
    pub fn from_impact(impact: f64) -> Self {
        if impact > 0.0 {
            FactorDirection::Increases
        } else {
            FactorDirection::Decreases
        }
    }
}

/// One attributed contribution to a driver's prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopFactor {
    pub feature: String,
    /// Signed attribution
    pub impact: f64,
    pub direction: FactorDirection,
    /// The driver's raw (unscaled) feature value
    pub value: f64,
}

/// Risk prediction for one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub driver_id: String,
    /// 100 x P(high risk), one decimal
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub probability: f64,
    /// Largest-magnitude attributions, at most the configured count
    pub top_factors: Vec<TopFactor>,
    /// 0 at P = 0.5, 1 at P = 0 or 1
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_category_from_score() {
        let thresholds = RiskThresholds::default();

        assert_eq!(RiskCategory::from_score(10.0, &thresholds), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(40.0, &thresholds), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(69.9, &thresholds), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(70.0, &thresholds), RiskCategory::High);
    }

    #[test]
    fn test_prediction_serialization() {
        let result = PredictionResult {
            driver_id: "DRV001".to_string(),
            risk_score: 78.3,
            risk_category: RiskCategory::High,
            probability: 0.783,
            top_factors: vec![TopFactor {
                feature: "concession_rate_30d".to_string(),
                impact: 0.42,
                direction: FactorDirection::Increases,
                value: 0.12,
            }],
            confidence: 0.566,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"high\""));
        assert!(json.contains("increases risk"));

        let deserialized: PredictionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, deserialized);
    }
}
