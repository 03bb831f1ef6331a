//! Type definitions shared by the analytics components

pub mod event;
pub mod prediction;

pub use event::{ColumnPresence, EventLog, EventRecord};
pub use prediction::{FactorDirection, PredictionResult, RiskCategory, RiskThresholds, TopFactor};
