//! Feature engineering for driver risk prediction.
//!
//! Turns the raw event log into one fixed-schema feature row per driver:
//! windowed concession rates, delivery performance, contact behaviour,
//! time-of-day patterns, trend indicators and the category mix.

pub mod table;

pub use table::FeatureTable;

use crate::config::FeatureConfig;
use crate::error::{AnalyticsError, Result};
use crate::stats::{finite_or_zero, mean, sample_std};
use crate::types::event::{EventLog, EventRecord};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Default hour reported when a driver has no recent concessions
const NEUTRAL_HOUR: f64 = 12.0;

/// Feature engineer that transforms event logs into model input features.
///
/// Output depends only on the events, the reference time and the
/// configuration; row order of the input never changes the result.
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Transform the log into a feature table as of `reference`.
    ///
    /// `reference` defaults to the latest event time. `drivers` restricts
    /// the output to those ids; ids without events get all-default rows.
    /// Rows are sorted by driver id.
    pub fn transform(
        &self,
        log: &EventLog,
        reference: Option<NaiveDateTime>,
        drivers: Option<&[String]>,
    ) -> Result<FeatureTable> {
        if self.config.time_windows.is_empty() {
            return Err(AnalyticsError::InvalidInput(
                "at least one time window is required".to_string(),
            ));
        }

        let columns = self.feature_names();
        let Some(reference) = reference.or_else(|| log.latest_timestamp()) else {
            debug!("Empty event log, returning empty feature table");
            return Ok(FeatureTable::new(columns));
        };

        let mut groups = log.by_driver();
        let selected: Vec<(String, Vec<&EventRecord>)> = match drivers {
            Some(ids) => {
                let mut ids: Vec<&String> = ids.iter().collect();
                ids.sort();
                ids.dedup();
                ids.into_iter()
                    .map(|id| (id.clone(), groups.remove(id.as_str()).unwrap_or_default()))
                    .collect()
            }
            None => groups
                .into_iter()
                .map(|(id, events)| (id.to_string(), events))
                .collect(),
        };

        let rows: Vec<(String, Vec<f64>)> = selected
            .into_par_iter()
            .map(|(id, events)| {
                let values = self.compute_driver_features(log, &events, reference);
                (id, values)
            })
            .collect();

        info!(
            drivers = rows.len(),
            features = columns.len(),
            reference = %reference,
            "Feature table computed"
        );

        FeatureTable::from_rows(columns, rows)
    }

    /// Compute every feature for one driver, in `feature_names()` order
    fn compute_driver_features(
        &self,
        log: &EventLog,
        events: &[&EventRecord],
        reference: NaiveDateTime,
    ) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.feature_count());

        // Historical rates (3 per window)
        for &window in &self.config.time_windows {
            let in_window = within(events, reference, window);
            let total = in_window.len();
            let concessions = in_window.iter().filter(|e| e.is_positive()).count();
            features.push(ratio(concessions, total));
            features.push(concessions as f64);
            features.push(total as f64);
        }

        let recent = within(events, reference, self.config.recent_window_days);
        let recent_positives: Vec<&EventRecord> =
            recent.iter().copied().filter(|e| e.is_positive()).collect();

        features.extend(self.performance_features(&recent));
        features.extend(self.contact_features(log, &recent));
        features.extend(self.time_pattern_features(&recent_positives));
        features.extend(self.trend_features(events, reference));
        features.extend(self.category_features(log, &recent_positives));

        features.into_iter().map(finite_or_zero).collect()
    }

    /// avg_daily_deliveries, delivery_count_variance, active_days_ratio
    fn performance_features(&self, recent: &[&EventRecord]) -> [f64; 3] {
        if recent.is_empty() {
            return [0.0; 3];
        }

        let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for event in recent {
            *daily.entry(event.date()).or_insert(0) += 1;
        }
        let counts: Vec<f64> = daily.values().map(|&c| c as f64).collect();

        let avg_daily = mean(&counts);
        let spread = sample_std(&counts).unwrap_or(0.0);
        let active_ratio =
            (counts.len() as f64 / self.config.recent_window_days.max(1) as f64).min(1.0);

        [avg_daily, spread, active_ratio]
    }

    /// contact_success_rate, no_contact_streak_max, contact_improvement_trend
    fn contact_features(&self, log: &EventLog, recent: &[&EventRecord]) -> [f64; 3] {
        if !log.columns().contact_made || recent.is_empty() {
            return [0.0; 3];
        }

        let mut ordered: Vec<(NaiveDateTime, bool)> = recent
            .iter()
            .map(|e| (e.timestamp, log.contact_of(e).unwrap_or(false)))
            .collect();
        ordered.sort();
        let contacts: Vec<f64> = ordered
            .iter()
            .map(|&(_, made)| if made { 1.0 } else { 0.0 })
            .collect();

        let success_rate = mean(&contacts);

        let mut streak = 0usize;
        let mut max_streak = 0usize;
        for &(_, made) in &ordered {
            if made {
                streak = 0;
            } else {
                streak += 1;
                max_streak = max_streak.max(streak);
            }
        }

        let trend = if contacts.len() >= self.config.contact_trend_min_events {
            let half = contacts.len() / 2;
            mean(&contacts[half..]) - mean(&contacts[..half])
        } else {
            0.0
        };

        [success_rate, max_streak as f64, trend]
    }

    /// morning/evening/weekend ratios and the modal weekday and hour
    fn time_pattern_features(&self, positives: &[&EventRecord]) -> [f64; 5] {
        if positives.is_empty() {
            return [0.0, 0.0, 0.0, 0.0, NEUTRAL_HOUR];
        }

        let total = positives.len();
        let (morning_start, morning_end) = self.config.morning_peak;
        let (evening_start, evening_end) = self.config.evening_peak;

        let mut weekday_counts = [0usize; 7];
        let mut hour_counts = [0usize; 24];
        let mut morning = 0;
        let mut evening = 0;
        let mut weekend = 0;
        for event in positives {
            let hour = event.hour();
            if (morning_start..morning_end).contains(&hour) {
                morning += 1;
            }
            if (evening_start..evening_end).contains(&hour) {
                evening += 1;
            }
            if event.is_weekend() {
                weekend += 1;
            }
            weekday_counts[event.weekday() as usize] += 1;
            hour_counts[hour as usize] += 1;
        }

        [
            ratio(morning, total),
            ratio(evening, total),
            ratio(weekend, total),
            argmax(&weekday_counts) as f64,
            argmax(&hour_counts) as f64,
        ]
    }

    /// rate_trend_7d, rate_trend_30d, volatility_index, improving_flag
    fn trend_features(&self, events: &[&EventRecord], reference: NaiveDateTime) -> [f64; 4] {
        let lookback = within(events, reference, self.config.trend_lookback_days);
        if lookback.len() < self.config.min_trend_events {
            return [0.0; 4];
        }

        let rates = daily_rates(&lookback);
        let days = rates.len();
        if days < self.config.min_trend_days {
            return [0.0; 4];
        }

        let trend_7d = if days >= self.config.delta_7d_min_days.max(14) {
            mean(&rates[days - 7..]) - mean(&rates[days - 14..days - 7])
        } else {
            0.0
        };
        let trend_30d = if days >= self.config.delta_30d_min_days.max(60) {
            mean(&rates[days - 30..]) - mean(&rates[days - 60..days - 30])
        } else {
            0.0
        };
        let volatility = sample_std(&rates).unwrap_or(0.0);
        let improving = if trend_7d < 0.0 { 1.0 } else { 0.0 };

        [trend_7d, trend_30d, volatility, improving]
    }

    /// pct_<category> for every configured category
    fn category_features(&self, log: &EventLog, positives: &[&EventRecord]) -> Vec<f64> {
        let types = &self.config.concession_types;
        if !log.columns().outcome_category || positives.is_empty() {
            return vec![0.0; types.len()];
        }

        types
            .iter()
            .map(|ctype| {
                let count = positives
                    .iter()
                    .filter(|e| e.outcome_category.as_deref() == Some(ctype.as_str()))
                    .count();
                ratio(count, positives.len())
            })
            .collect()
    }

    /// Number of features produced
    pub fn feature_count(&self) -> usize {
        self.config.time_windows.len() * 3
            + PERFORMANCE_FEATURES.len()
            + CONTACT_FEATURES.len()
            + TIME_PATTERN_FEATURES.len()
            + TREND_FEATURES.len()
            + self.config.concession_types.len()
    }

    /// Feature names in output column order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.feature_count());

        for window in &self.config.time_windows {
            names.push(format!("concession_rate_{}d", window));
            names.push(format!("concession_count_{}d", window));
            names.push(format!("delivery_count_{}d", window));
        }
        names.extend(
            PERFORMANCE_FEATURES
                .iter()
                .chain(CONTACT_FEATURES)
                .chain(TIME_PATTERN_FEATURES)
                .chain(TREND_FEATURES)
                .map(|s| s.to_string()),
        );
        for ctype in &self.config.concession_types {
            names.push(format!("pct_{}", ctype));
        }

        names
    }

    /// Feature names grouped by category for interpretability
    pub fn feature_groups(&self) -> Vec<(&'static str, Vec<String>)> {
        let names = self.feature_names();
        let to_strings = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        vec![
            (
                "historical_rates",
                names
                    .iter()
                    .filter(|n| n.starts_with("concession_") || n.starts_with("delivery_count_"))
                    .cloned()
                    .collect(),
            ),
            ("performance", to_strings(PERFORMANCE_FEATURES)),
            ("contact", to_strings(CONTACT_FEATURES)),
            ("time_patterns", to_strings(TIME_PATTERN_FEATURES)),
            ("trends", to_strings(TREND_FEATURES)),
            (
                "concession_types",
                names.iter().filter(|n| n.starts_with("pct_")).cloned().collect(),
            ),
        ]
    }
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

const PERFORMANCE_FEATURES: &[&str] = &[
    "avg_daily_deliveries",
    "delivery_count_variance",
    "active_days_ratio",
];

const CONTACT_FEATURES: &[&str] = &[
    "contact_success_rate",
    "no_contact_streak_max",
    "contact_improvement_trend",
];

const TIME_PATTERN_FEATURES: &[&str] = &[
    "morning_peak_ratio",
    "evening_peak_ratio",
    "weekend_ratio",
    "weekday_with_most_concessions",
    "hour_with_most_concessions",
];

const TREND_FEATURES: &[&str] = &[
    "rate_trend_7d",
    "rate_trend_30d",
    "volatility_index",
    "improving_flag",
];

/// Events in the trailing window `[reference - days, reference]`
fn within<'a>(
    events: &[&'a EventRecord],
    reference: NaiveDateTime,
    days: u32,
) -> Vec<&'a EventRecord> {
    let start = reference - Duration::days(i64::from(days));
    events
        .iter()
        .copied()
        .filter(|e| e.timestamp >= start && e.timestamp <= reference)
        .collect()
}

/// Per-day concession rate, in date order
pub(crate) fn daily_rates(events: &[&EventRecord]) -> Vec<f64> {
    let mut daily: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for event in events {
        let entry = daily.entry(event.date()).or_insert((0, 0));
        entry.1 += 1;
        if event.is_positive() {
            entry.0 += 1;
        }
    }
    daily
        .values()
        .map(|&(positives, total)| ratio(positives, total))
        .collect()
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Index of the largest count; ties go to the smallest index
fn argmax(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::parse_timestamp;

    fn at(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn sample_log() -> EventLog {
        let mut records = Vec::new();
        // DRV01: one delivery per day for 40 days, every 4th a concession
        let start = at("2024-11-01 08:00:00");
        for day in 0..40 {
            let mut record = EventRecord::new("DRV01", start + Duration::days(day))
                .with_contact(day % 5 != 0);
            if day % 4 == 0 {
                record = record.with_outcome("neighbor");
            }
            records.push(record);
        }
        // DRV02: three deliveries, no concessions
        for day in 35..38 {
            records.push(EventRecord::new("DRV02", start + Duration::days(day)).with_contact(true));
        }
        EventLog::new(records)
    }

    #[test]
    fn test_feature_count_matches_names() {
        let engineer = FeatureEngineer::default();
        assert_eq!(engineer.feature_names().len(), engineer.feature_count());
        assert_eq!(engineer.feature_count(), 36);
    }

    #[test]
    fn test_transform_shape_and_order() {
        let engineer = FeatureEngineer::default();
        let table = engineer.transform(&sample_log(), None, None).unwrap();

        assert_eq!(table.index(), &["DRV01".to_string(), "DRV02".to_string()]);
        assert_eq!(table.columns().len(), engineer.feature_count());
    }

    #[test]
    fn test_window_counts() {
        let engineer = FeatureEngineer::default();
        let table = engineer.transform(&sample_log(), None, None).unwrap();

        // reference = 2024-12-10 08:00, 7-day window covers days 32..=39
        assert_eq!(table.get("DRV01", "delivery_count_7d"), Some(8.0));
        assert_eq!(table.get("DRV01", "concession_count_7d"), Some(2.0));
        assert_eq!(table.get("DRV01", "concession_rate_7d"), Some(0.25));
        assert_eq!(table.get("DRV01", "delivery_count_90d"), Some(40.0));
        assert_eq!(table.get("DRV02", "concession_rate_30d"), Some(0.0));
    }

    #[test]
    fn test_reference_excludes_later_events() {
        let engineer = FeatureEngineer::default();
        let reference = at("2024-11-10 08:00:00");
        let table = engineer
            .transform(&sample_log(), Some(reference), None)
            .unwrap();

        assert_eq!(table.get("DRV01", "delivery_count_90d"), Some(10.0));
        assert_eq!(table.get("DRV02", "delivery_count_90d"), Some(0.0));
    }

    #[test]
    fn test_driver_subset_includes_unknown_driver() {
        let engineer = FeatureEngineer::default();
        let drivers = vec!["DRV99".to_string(), "DRV02".to_string()];
        let table = engineer
            .transform(&sample_log(), None, Some(&drivers))
            .unwrap();

        assert_eq!(table.index(), &["DRV02".to_string(), "DRV99".to_string()]);
        assert_eq!(table.get("DRV99", "delivery_count_30d"), Some(0.0));
        assert_eq!(table.get("DRV99", "hour_with_most_concessions"), Some(12.0));
    }

    #[test]
    fn test_contact_streak() {
        let start = at("2024-12-01 08:00:00");
        let pattern = [true, false, false, false, true, false, false, true];
        let records: Vec<EventRecord> = pattern
            .iter()
            .enumerate()
            .map(|(i, &made)| {
                EventRecord::new("DRV01", start + Duration::hours(i as i64)).with_contact(made)
            })
            .collect();
        let log = EventLog::new(records);

        let table = FeatureEngineer::default().transform(&log, None, None).unwrap();
        assert_eq!(table.get("DRV01", "no_contact_streak_max"), Some(3.0));
        assert_eq!(table.get("DRV01", "contact_success_rate"), Some(3.0 / 8.0));
        // fewer than 10 observations: no split-half trend
        assert_eq!(table.get("DRV01", "contact_improvement_trend"), Some(0.0));
    }

    #[test]
    fn test_missing_optional_columns_default_to_zero() {
        let start = at("2024-12-01 08:00:00");
        let records = (0..5)
            .map(|i| EventRecord::new("DRV01", start + Duration::hours(i)))
            .collect();
        let log = EventLog::new(records);

        let table = FeatureEngineer::default().transform(&log, None, None).unwrap();
        assert_eq!(table.get("DRV01", "contact_success_rate"), Some(0.0));
        assert_eq!(table.get("DRV01", "pct_neighbor"), Some(0.0));
        assert_eq!(table.get("DRV01", "concession_rate_30d"), Some(0.0));
    }

    #[test]
    fn test_time_patterns_and_categories() {
        // 2024-12-07 is a Saturday
        let records = vec![
            EventRecord::new("DRV01", at("2024-12-07 07:30:00")).with_outcome("neighbor"),
            EventRecord::new("DRV01", at("2024-12-07 07:45:00")).with_outcome("mailbox"),
            EventRecord::new("DRV01", at("2024-12-09 18:00:00")).with_outcome("neighbor"),
            EventRecord::new("DRV01", at("2024-12-09 12:00:00")),
        ];
        let table = FeatureEngineer::default()
            .transform(&EventLog::new(records), None, None)
            .unwrap();

        assert_eq!(table.get("DRV01", "morning_peak_ratio"), Some(2.0 / 3.0));
        assert_eq!(table.get("DRV01", "evening_peak_ratio"), Some(1.0 / 3.0));
        assert_eq!(table.get("DRV01", "weekend_ratio"), Some(2.0 / 3.0));
        assert_eq!(table.get("DRV01", "weekday_with_most_concessions"), Some(5.0));
        assert_eq!(table.get("DRV01", "hour_with_most_concessions"), Some(7.0));
        assert_eq!(table.get("DRV01", "pct_neighbor"), Some(2.0 / 3.0));
        assert_eq!(table.get("DRV01", "pct_mailbox"), Some(1.0 / 3.0));
    }

    #[test]
    fn test_trend_features_need_enough_days() {
        let engineer = FeatureEngineer::default();
        let table = engineer.transform(&sample_log(), None, None).unwrap();

        // 40 distinct days: 7-day delta available, 30-day delta not
        assert_eq!(table.get("DRV01", "rate_trend_30d"), Some(0.0));
        assert!(table.get("DRV01", "volatility_index").unwrap() > 0.0);
        // DRV02 has only three events
        assert_eq!(table.get("DRV02", "volatility_index"), Some(0.0));
    }

    #[test]
    fn test_rising_rate_is_not_improving() {
        let start = at("2024-11-01 09:00:00");
        let mut records = Vec::new();
        for day in 0..14 {
            for slot in 0..4 {
                let mut record = EventRecord::new(
                    "DRV01",
                    start + Duration::days(day) + Duration::hours(slot),
                );
                // second week: half of all deliveries are concessions
                if day >= 7 && slot < 2 {
                    record = record.with_outcome("other");
                }
                records.push(record);
            }
        }
        let table = FeatureEngineer::default()
            .transform(&EventLog::new(records), None, None)
            .unwrap();

        assert_eq!(table.get("DRV01", "rate_trend_7d"), Some(0.5));
        assert_eq!(table.get("DRV01", "improving_flag"), Some(0.0));
    }

    #[test]
    fn test_row_order_independent() {
        let log = sample_log();
        let mut reversed: Vec<EventRecord> = log.records().to_vec();
        reversed.reverse();
        let reversed = EventLog::new(reversed);

        let engineer = FeatureEngineer::default();
        let a = engineer.transform(&log, None, None).unwrap();
        let b = engineer.transform(&reversed, None, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_feature_groups_cover_all_features() {
        let engineer = FeatureEngineer::default();
        let grouped: usize = engineer.feature_groups().iter().map(|(_, f)| f.len()).sum();
        assert_eq!(grouped, engineer.feature_count());
    }
}
