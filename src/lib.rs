//! Concession Analytics Library
//!
//! Batch analytics over delivery concession logs: per-driver behavioural
//! features, a gradient-boosted driver risk score with per-prediction
//! attributions, statistical pattern detection and location-level
//! customer-abuse indicators.

pub mod abuse;
pub mod config;
pub mod error;
pub mod feature_engineer;
pub mod labeling;
pub mod metrics;
pub mod models;
pub mod patterns;
pub mod stats;
pub mod types;

pub use abuse::{AbuseDetector, AbuseReport};
pub use config::AppConfig;
pub use error::{AnalyticsError, Result};
pub use feature_engineer::{FeatureEngineer, FeatureTable};
pub use metrics::RunMetrics;
pub use models::RiskScorer;
pub use patterns::PatternAnalyzer;
pub use types::{EventLog, EventRecord, PredictionResult};
