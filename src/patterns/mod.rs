//! Pattern analysis over event logs and feature tables.
//!
//! Every detector is a pure function of its inputs and the configuration.
//! Below the documented minimum sample sizes a detector returns an empty
//! or neutral result instead of an error.

mod anomaly;
mod change_points;
mod clustering;
mod correlation;
mod time_patterns;
mod trend;
pub mod types;

pub use types::*;

use crate::config::PatternConfig;
use crate::types::event::EventRecord;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Time patterns, trends, anomalies, rate buckets, change points and correlations
pub struct PatternAnalyzer {
    config: PatternConfig,
}

impl PatternAnalyzer {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Anomaly cutoff from configuration: sigma when set, else contamination
    pub fn anomaly_method(&self) -> AnomalyMethod {
        match self.config.anomaly_sigma {
            Some(sigma) => AnomalyMethod::Sigma(sigma),
            None => AnomalyMethod::Contamination(self.config.anomaly_contamination),
        }
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

/// Positives and totals for one calendar day
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DailyRate {
    pub date: NaiveDate,
    pub positives: usize,
    pub total: usize,
}

impl DailyRate {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.positives as f64 / self.total as f64
        }
    }
}

/// Per-day counts in date order
pub(crate) fn daily_series(events: &[&EventRecord]) -> Vec<DailyRate> {
    let mut days: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for event in events {
        let entry = days.entry(event.date()).or_insert((0, 0));
        entry.1 += 1;
        if event.is_positive() {
            entry.0 += 1;
        }
    }
    days.into_iter()
        .map(|(date, (positives, total))| DailyRate {
            date,
            positives,
            total,
        })
        .collect()
}
