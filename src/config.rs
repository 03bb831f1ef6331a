//! Configuration management for the analytics engine
//!
//! Every threshold and window size used by the components lives here so a
//! single config file reproduces a run exactly.

use anyhow::{Context, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    /// Training label policy; training is skipped when absent
    #[serde(default)]
    pub labeling: Option<LabelingConfig>,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub abuse: AbuseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Feature engineering configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing windows (days) for rate/count features
    pub time_windows: Vec<u32>,
    /// Morning band as [start, end) hours
    pub morning_peak: (u32, u32),
    /// Evening band as [start, end) hours
    pub evening_peak: (u32, u32),
    /// Window for performance, contact, time-pattern and category features
    pub recent_window_days: u32,
    /// Lookback window for trend features
    pub trend_lookback_days: u32,
    /// Minimum events in the lookback window before any trend feature
    pub min_trend_events: usize,
    /// Minimum distinct days before volatility is computed
    pub min_trend_days: usize,
    /// Distinct days required for the 7-day delta
    pub delta_7d_min_days: usize,
    /// Distinct days required for the 30-day delta
    pub delta_30d_min_days: usize,
    /// Minimum contact observations for the split-half trend
    pub contact_trend_min_events: usize,
    /// Known outcome categories, one `pct_*` feature each
    pub concession_types: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            time_windows: vec![7, 14, 30, 60, 90],
            morning_peak: (6, 9),
            evening_peak: (17, 20),
            recent_window_days: 30,
            trend_lookback_days: 60,
            min_trend_events: 14,
            min_trend_days: 7,
            delta_7d_min_days: 14,
            delta_30d_min_days: 60,
            contact_trend_min_events: 10,
            concession_types: default_concession_types(),
        }
    }
}

fn default_concession_types() -> Vec<String> {
    [
        "neighbor",
        "safe_location",
        "mailbox",
        "household_member",
        "receptionist",
        "other",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Explainer used to attribute individual predictions
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExplainerKind {
    /// Additive decision-path attribution over the boosted trees
    #[default]
    TreePath,
    /// Model-agnostic permutation attribution against a background sample
    Permutation,
    /// No explanations (empty top factors)
    None,
}

/// Risk model configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Score >= this is high risk
    pub risk_threshold_high: f64,
    /// Score >= this is medium risk
    pub risk_threshold_medium: f64,
    /// Held-out fraction for evaluation
    pub test_size: f64,
    pub cross_validation_folds: usize,
    pub random_state: u64,
    /// Number of attribution factors reported per driver
    pub top_factors: usize,
    pub explainer: ExplainerKind,
    /// Training rows kept as permutation background
    pub background_size: usize,
    pub booster: BoosterParams,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_threshold_high: 70.0,
            risk_threshold_medium: 40.0,
            test_size: 0.2,
            cross_validation_folds: 5,
            random_state: 42,
            top_factors: 5,
            explainer: ExplainerKind::TreePath,
            background_size: 50,
            booster: BoosterParams::default(),
        }
    }
}

/// Gradient boosting hyperparameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BoosterParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// Row sampling fraction per tree
    pub subsample: f64,
    /// Column sampling fraction per tree
    pub colsample_bytree: f64,
    /// Minimum loss reduction to split
    pub gamma: f64,
    /// L1 regularisation on leaf weights
    pub reg_alpha: f64,
    /// L2 regularisation on leaf weights
    pub reg_lambda: f64,
    /// Gradient weight multiplier for positive rows
    pub scale_pos_weight: f64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 6,
            learning_rate: 0.1,
            min_child_weight: 3.0,
            subsample: 0.8,
            colsample_bytree: 0.8,
            gamma: 0.1,
            reg_alpha: 0.1,
            reg_lambda: 1.0,
            scale_pos_weight: 1.0,
        }
    }
}

/// How training labels are derived from a feature table
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelingPolicyKind {
    Threshold,
    MedianSplit,
}

/// Externally supplied labeling policy
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LabelingConfig {
    pub policy: LabelingPolicyKind,
    /// Feature column the policy reads
    pub feature: String,
    /// Cut-off for the threshold policy (label = value > threshold)
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Pattern recognition configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PatternConfig {
    pub min_positive_events: usize,
    pub weekday_concentration: f64,
    pub peak_hour_concentration: f64,
    pub weekend_difference: f64,
    pub trend_significance_level: f64,
    /// Minimum |slope| per day for a non-stable trend
    pub trend_min_slope: f64,
    pub min_trend_days: usize,
    pub anomaly_min_rows: usize,
    /// Expected outlier fraction
    pub anomaly_contamination: f64,
    /// Fixed deviation cutoff; overrides the contamination quantile when set
    pub anomaly_sigma: Option<f64>,
    /// Rate feature used for anomaly direction and bucketing
    pub headline_feature: String,
    pub min_clusters: usize,
    pub max_clusters: usize,
    pub entities_per_cluster: usize,
    pub cluster_min_entities: usize,
    pub change_point_window: usize,
    pub change_point_min_periods: usize,
    pub change_point_min_events: usize,
    pub change_point_min_days: usize,
    pub change_point_relative_change: f64,
    pub change_point_max_results: usize,
    pub correlation_threshold: f64,
    pub strong_correlation: f64,
    pub correlation_max_results: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_positive_events: 5,
            weekday_concentration: 0.25,
            peak_hour_concentration: 0.15,
            weekend_difference: 0.10,
            trend_significance_level: 0.05,
            trend_min_slope: 0.001,
            min_trend_days: 7,
            anomaly_min_rows: 10,
            anomaly_contamination: 0.1,
            anomaly_sigma: None,
            headline_feature: "concession_rate_30d".to_string(),
            min_clusters: 2,
            max_clusters: 5,
            entities_per_cluster: 10,
            cluster_min_entities: 10,
            change_point_window: 7,
            change_point_min_periods: 3,
            change_point_min_events: 30,
            change_point_min_days: 14,
            change_point_relative_change: 0.30,
            change_point_max_results: 5,
            correlation_threshold: 0.5,
            strong_correlation: 0.7,
            correlation_max_results: 10,
        }
    }
}

/// Customer abuse detection configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AbuseConfig {
    pub min_events_per_location: usize,
    pub high_rate_threshold: f64,
    pub critical_rate_threshold: f64,
    pub high_frequency_min_positives: usize,
    pub multi_actor_min_drivers: usize,
    pub multi_actor_high_drivers: usize,
    pub repeat_min_positives: usize,
    pub time_concentration_threshold: f64,
    pub time_concentration_min_samples: usize,
    /// Characters of the tracking id used when no location key exists
    pub tracking_prefix_len: usize,
    pub fallback_confidence_factor: f64,
    pub fallback_confidence_cap: f64,
    pub score: AbuseScoreWeights,
    pub suspicious_rule: SuspiciousRule,
    /// Score at or above which a location counts as suspicious under the score rule
    pub suspicious_score: f64,
}

/// How a location is marked suspicious
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousRule {
    /// Abuse score at or above `suspicious_score`
    #[default]
    Score,
    /// Positive rate at or above `high_rate_threshold`
    Rate,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            min_events_per_location: 3,
            high_rate_threshold: 0.30,
            critical_rate_threshold: 0.70,
            high_frequency_min_positives: 3,
            multi_actor_min_drivers: 2,
            multi_actor_high_drivers: 3,
            repeat_min_positives: 3,
            time_concentration_threshold: 0.70,
            time_concentration_min_samples: 3,
            tracking_prefix_len: 10,
            fallback_confidence_factor: 0.8,
            fallback_confidence_cap: 0.9,
            score: AbuseScoreWeights::default(),
            suspicious_rule: SuspiciousRule::Score,
            suspicious_score: 50.0,
        }
    }
}

/// Weights and caps of the composite abuse score
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AbuseScoreWeights {
    pub rate_weight: f64,
    pub rate_cap: f64,
    pub count_weight: f64,
    pub count_cap: f64,
    pub driver_weight: f64,
    pub driver_cap: f64,
    pub category_strong_share: f64,
    pub category_strong_points: f64,
    pub category_moderate_share: f64,
    pub category_moderate_points: f64,
}

impl Default for AbuseScoreWeights {
    fn default() -> Self {
        Self {
            rate_weight: 80.0,
            rate_cap: 40.0,
            count_weight: 4.0,
            count_cap: 20.0,
            driver_weight: 10.0,
            driver_cap: 20.0,
            category_strong_share: 0.8,
            category_strong_points: 20.0,
            category_moderate_share: 0.6,
            category_moderate_points: 10.0,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for parallel aggregation (0 = one per core)
    pub workers: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
