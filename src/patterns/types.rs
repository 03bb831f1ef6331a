//! Value objects produced by the pattern analyzer

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    WeekdayConcentration,
    PeakHour,
    WeekendDifference,
}

/// Measurements behind a detected time pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternDetails {
    Weekday {
        peak_day: u32,
        peak_day_name: String,
        concentration: f64,
        /// Share of positive events per weekday (Monday = 0)
        distribution: BTreeMap<u32, f64>,
    },
    Hour {
        peak_hour: u32,
        concentration: f64,
        /// Five busiest hours with their share
        distribution: Vec<(u32, f64)>,
    },
    Weekend {
        weekend_concession_rate: f64,
        overall_weekend_rate: f64,
        difference: f64,
    },
}

/// A detected time-based pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_type: PatternType,
    pub description: String,
    pub confidence: f64,
    pub details: PatternDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::InsufficientData => "insufficient_data",
        }
    }
}

/// Linear trend of the daily positive rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// Rate change per day
    pub slope: f64,
    /// 1 - p-value of the slope
    pub significance: f64,
    pub is_significant: bool,
    /// Clipped rate forecast for each of the next seven days
    pub forecast: Vec<f64>,
    pub forecast_7d: f64,
    pub forecast_30d: f64,
    /// Distinct days in the fitted series
    pub days: usize,
    pub description: String,
}

impl TrendAnalysis {
    pub fn insufficient(days: usize, description: impl Into<String>) -> Self {
        Self {
            direction: TrendDirection::InsufficientData,
            slope: 0.0,
            significance: 0.0,
            is_significant: false,
            forecast: Vec::new(),
            forecast_7d: 0.0,
            forecast_30d: 0.0,
            days,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Spike,
    Drop,
}

/// Anomaly selection rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyMethod {
    /// Flag scores above the (1 - fraction) population quantile
    Contamination(f64),
    /// Flag mean |z| above this many standard deviations
    Sigma(f64),
}

/// A driver whose feature profile deviates from the population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub driver_id: String,
    pub anomaly_type: AnomalyType,
    /// Mean absolute z-score across features
    pub deviation_score: f64,
    pub threshold: f64,
    /// Headline rate band: mean +/- 2 std, lower end clipped at 0
    pub expected_range: (f64, f64),
    /// The driver's headline rate
    pub actual_value: f64,
    /// Three features with the largest |z|
    pub top_features: Vec<(String, f64)>,
    pub description: String,
}

/// One rate bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub name: String,
    pub size: usize,
    pub avg_rate: f64,
    /// First five members
    pub drivers: Vec<String>,
}

/// Quantile bucketing of the headline rate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub n_clusters: usize,
    pub n_outliers: usize,
    pub profiles: Vec<ClusterProfile>,
    pub assignments: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

/// Shift in the daily positive rate between adjacent windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePoint {
    pub date: NaiveDate,
    pub before_rate: f64,
    pub after_rate: f64,
    pub change_pct: f64,
    pub direction: ChangeDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    Strong,
    Moderate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub feature1: String,
    pub feature2: String,
    pub correlation: f64,
    pub strength: CorrelationStrength,
}

/// Pairwise Pearson correlations between features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationAnalysis {
    pub columns: Vec<String>,
    /// None where a column has no variance
    pub matrix: Vec<Vec<Option<f64>>>,
    /// Pairs above the threshold, strongest first
    pub significant: Vec<CorrelationPair>,
}

/// Positive rate for one hour x weekday cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub hour: u32,
    pub weekday: u32,
    pub concessions: usize,
    pub total: usize,
    /// Positive rate in percent
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeHeatmap {
    pub cells: Vec<HeatmapCell>,
}

impl TimeHeatmap {
    pub fn rate(&self, hour: u32, weekday: u32) -> Option<f64> {
        self.cells
            .iter()
            .find(|c| c.hour == hour && c.weekday == weekday)
            .map(|c| c.rate)
    }
}
