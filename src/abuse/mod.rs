//! Customer abuse detection.
//!
//! Events are grouped by delivery location. A location that repeatedly
//! triggers concessions, especially across different drivers, points at the
//! customer rather than the driver. Rows without a location key fall back to
//! a tracking-id prefix; patterns found that way carry reduced confidence.

mod types;

pub use types::*;

use crate::config::{AbuseConfig, AbuseScoreWeights, SuspiciousRule};
use crate::types::event::{EventLog, EventRecord};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Drivers with concessions at which a multi-actor pattern reaches full confidence
const MULTI_ACTOR_FULL_CONFIDENCE: f64 = 5.0;

const SAME_DAY_REPEAT_CONFIDENCE: f64 = 0.8;

type GroupKey = (KeySource, String);

/// Location-level abuse analysis
pub struct AbuseDetector {
    config: AbuseConfig,
}

impl AbuseDetector {
    pub fn new(config: AbuseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AbuseConfig {
        &self.config
    }

    /// Analyze every location in the log.
    ///
    /// Locations with fewer than `min_events_per_location` events are
    /// skipped. Locations are ranked by abuse score, ties by key.
    pub fn analyze(&self, log: &EventLog) -> AbuseReport {
        let groups = self.partition(log);

        let analyzed: Vec<(LocationProfile, Vec<AbusePattern>)> = groups
            .par_iter()
            .filter_map(|((source, key), events)| self.analyze_location(*source, key, events))
            .collect();

        let mut locations = Vec::with_capacity(analyzed.len());
        let mut patterns = Vec::new();
        for (profile, found) in analyzed {
            locations.push(profile);
            patterns.extend(found);
        }

        locations.sort_by(|a, b| {
            b.abuse_score
                .total_cmp(&a.abuse_score)
                .then_with(|| a.key_source.cmp(&b.key_source))
                .then_with(|| a.location_key.cmp(&b.location_key))
        });
        patterns.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.location_key.cmp(&b.location_key))
                .then_with(|| a.pattern_type.cmp(&b.pattern_type))
        });

        let summary = summarize(log, &locations, &patterns);
        info!(
            locations = summary.locations_analyzed,
            patterns = summary.total_patterns,
            suspicious = summary.suspicious_locations,
            "Abuse analysis complete"
        );

        AbuseReport {
            patterns,
            locations,
            summary,
        }
    }

    /// Composite abuse score in [0, 100]; zero when there are no positives.
    ///
    /// The driver term counts every distinct driver seen at the location.
    pub fn abuse_score(
        &self,
        rate: f64,
        positives: usize,
        unique_drivers: usize,
        categories: &BTreeMap<String, usize>,
    ) -> f64 {
        if positives == 0 {
            return 0.0;
        }
        let w: &AbuseScoreWeights = &self.config.score;

        let mut score = (rate * w.rate_weight).min(w.rate_cap)
            + (positives as f64 * w.count_weight).min(w.count_cap)
            + (unique_drivers.saturating_sub(1) as f64 * w.driver_weight).min(w.driver_cap);

        let total: usize = categories.values().sum();
        if let Some(&top) = categories.values().max().filter(|_| total > 0) {
            let share = top as f64 / total as f64;
            if share >= w.category_strong_share {
                score += w.category_strong_points;
            } else if share >= w.category_moderate_share {
                score += w.category_moderate_points;
            }
        }

        score.clamp(0.0, 100.0)
    }

    /// Group events by location key, falling back to the tracking prefix.
    /// Rows with neither are left out.
    fn partition<'a>(&self, log: &'a EventLog) -> Vec<(GroupKey, Vec<&'a EventRecord>)> {
        let mut groups: BTreeMap<GroupKey, Vec<&EventRecord>> = BTreeMap::new();
        let mut unkeyed = 0usize;

        for record in log.records() {
            let key = match (record.location_key.as_deref(), record.tracking_id.as_deref()) {
                (Some(location), _) if !location.is_empty() => {
                    (KeySource::Location, location.to_string())
                }
                (_, Some(tracking)) if !tracking.is_empty() => (
                    KeySource::TrackingPrefix,
                    tracking.chars().take(self.config.tracking_prefix_len).collect(),
                ),
                _ => {
                    unkeyed += 1;
                    continue;
                }
            };
            groups.entry(key).or_default().push(record);
        }

        if unkeyed > 0 {
            debug!(unkeyed, "Events without location key or tracking id skipped");
        }
        groups.into_iter().collect()
    }

    fn analyze_location(
        &self,
        source: KeySource,
        key: &str,
        events: &[&EventRecord],
    ) -> Option<(LocationProfile, Vec<AbusePattern>)> {
        if events.len() < self.config.min_events_per_location.max(1) {
            return None;
        }
        let first_seen = events.iter().map(|e| e.timestamp).min()?;
        let last_seen = events.iter().map(|e| e.timestamp).max()?;

        let mut positives: Vec<&EventRecord> =
            events.iter().copied().filter(|e| e.is_positive()).collect();
        positives.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });

        let rate = positives.len() as f64 / events.len() as f64;
        let unique_drivers = events
            .iter()
            .map(|e| e.driver_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let drivers: Vec<String> = positives
            .iter()
            .map(|e| e.driver_id.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
        for event in &positives {
            if let Some(category) = event.outcome_category.as_deref() {
                *category_counts.entry(category.to_string()).or_default() += 1;
            }
        }

        let abuse_score = self.abuse_score(rate, positives.len(), unique_drivers, &category_counts);

        let site = Site {
            source,
            key,
            total: events.len(),
            rate,
            range: (first_seen, last_seen),
            positives: &positives,
            drivers: &drivers,
        };
        let patterns: Vec<AbusePattern> = [
            self.high_frequency(&site),
            self.multi_actor(&site),
            self.same_day_repeat(&site),
            self.time_concentration(&site),
        ]
        .into_iter()
        .flatten()
        .collect();

        let profile = LocationProfile {
            location_key: key.to_string(),
            key_source: source,
            total_events: events.len(),
            positive_events: positives.len(),
            positive_rate: rate,
            unique_drivers,
            drivers_with_positives: drivers.len(),
            category_counts,
            first_seen,
            last_seen,
            abuse_score,
            is_suspicious: self.is_suspicious(rate, abuse_score),
            patterns: patterns.iter().map(|p| p.pattern_type).collect(),
        };

        Some((profile, patterns))
    }

    fn is_suspicious(&self, rate: f64, abuse_score: f64) -> bool {
        match self.config.suspicious_rule {
            SuspiciousRule::Score => abuse_score >= self.config.suspicious_score,
            SuspiciousRule::Rate => rate >= self.config.high_rate_threshold,
        }
    }

    fn high_frequency(&self, site: &Site) -> Option<AbusePattern> {
        if site.rate < self.config.high_rate_threshold
            || site.positives.len() < self.config.high_frequency_min_positives
        {
            return None;
        }
        let severity = if site.rate >= self.config.critical_rate_threshold {
            Severity::Critical
        } else {
            Severity::High
        };
        Some(self.pattern(
            site,
            AbusePatternType::HighFrequency,
            severity,
            site.rate.min(1.0),
            format!(
                "Location with {:.0}% concession rate ({}/{} deliveries)",
                site.rate * 100.0,
                site.positives.len(),
                site.total
            ),
            site.positives.len(),
            site.range,
            &[
                "Flag location for manual review",
                "Check the customer's delivery history",
                "Request photo documentation on the next delivery",
            ],
        ))
    }

    fn multi_actor(&self, site: &Site) -> Option<AbusePattern> {
        let actors = site.drivers.len();
        if actors < self.config.multi_actor_min_drivers.max(2) {
            return None;
        }
        let severity = if actors >= self.config.multi_actor_high_drivers {
            Severity::High
        } else {
            Severity::Medium
        };
        Some(self.pattern(
            site,
            AbusePatternType::MultiActor,
            severity,
            (actors as f64 / MULTI_ACTOR_FULL_CONFIDENCE).min(1.0),
            format!("Concessions by {} different drivers at the same location", actors),
            actors,
            site.range,
            &[
                "Likely customer-side issue: several drivers affected",
                "Agree a delivery time with the customer",
                "Suggest an alternative drop-off point",
            ],
        ))
    }

    fn same_day_repeat(&self, site: &Site) -> Option<AbusePattern> {
        if site.positives.len() < self.config.repeat_min_positives {
            return None;
        }
        let days = site
            .positives
            .iter()
            .map(|e| e.date())
            .collect::<BTreeSet<_>>()
            .len();
        if days == site.positives.len() {
            return None;
        }
        Some(self.pattern(
            site,
            AbusePatternType::SameDayRepeat,
            Severity::High,
            SAME_DAY_REPEAT_CONFIDENCE,
            "Repeated concessions on the same day at this location".to_string(),
            days,
            positive_range(site.positives)?,
            &[
                "Possible systematic customer abuse",
                "Deliver only against signature",
                "Consider time-slot delivery",
            ],
        ))
    }

    fn time_concentration(&self, site: &Site) -> Option<AbusePattern> {
        let samples = site.positives.len();
        if samples < self.config.time_concentration_min_samples.max(1) {
            return None;
        }
        let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
        for event in site.positives {
            *hours.entry(event.hour()).or_default() += 1;
        }
        // first maximum wins, so ties go to the earliest hour
        let (peak_hour, peak_count) = hours
            .iter()
            .fold((0u32, 0usize), |best, (&h, &c)| if c > best.1 { (h, c) } else { best });

        let concentration = peak_count as f64 / samples as f64;
        if concentration < self.config.time_concentration_threshold {
            return None;
        }
        let absent_hint = format!("Customer appears regularly absent around {}:00", peak_hour);
        Some(self.pattern(
            site,
            AbusePatternType::TimeConcentration,
            Severity::Medium,
            concentration,
            format!(
                "{:.0}% of concessions at this location happen around {}:00",
                concentration * 100.0,
                peak_hour
            ),
            samples,
            positive_range(site.positives)?,
            &[
                absent_hint.as_str(),
                "Suggest an alternative delivery time",
                "Offer a parcel shop or locker",
            ],
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn pattern(
        &self,
        site: &Site,
        pattern_type: AbusePatternType,
        severity: Severity,
        confidence: f64,
        description: String,
        unique_incidents: usize,
        date_range: (NaiveDateTime, NaiveDateTime),
        recommendations: &[&str],
    ) -> AbusePattern {
        let mut recommendations: Vec<String> =
            recommendations.iter().map(|r| r.to_string()).collect();
        let confidence = match site.source {
            KeySource::Location => confidence,
            KeySource::TrackingPrefix => {
                recommendations.push("Check whether these tracking ids share one address".to_string());
                (confidence * self.config.fallback_confidence_factor)
                    .min(self.config.fallback_confidence_cap)
            }
        };

        AbusePattern {
            pattern_id: format!("{}_{}", pattern_type.as_str().to_uppercase(), site.key),
            location_key: site.key.to_string(),
            key_source: site.source,
            pattern_type,
            severity,
            confidence,
            description,
            positive_count: site.positives.len(),
            unique_incidents,
            drivers: site.drivers.to_vec(),
            date_range,
            recommendations,
        }
    }
}

impl Default for AbuseDetector {
    fn default() -> Self {
        Self::new(AbuseConfig::default())
    }
}

/// Per-location inputs shared by the pattern checks
struct Site<'a> {
    source: KeySource,
    key: &'a str,
    total: usize,
    rate: f64,
    range: (NaiveDateTime, NaiveDateTime),
    /// Sorted by timestamp
    positives: &'a [&'a EventRecord],
    drivers: &'a [String],
}

fn positive_range(positives: &[&EventRecord]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    Some((positives.first()?.timestamp, positives.last()?.timestamp))
}

fn summarize(log: &EventLog, locations: &[LocationProfile], patterns: &[AbusePattern]) -> AbuseSummary {
    let mut patterns_by_severity = BTreeMap::new();
    for pattern in patterns {
        *patterns_by_severity.entry(pattern.severity).or_insert(0) += 1;
    }

    AbuseSummary {
        total_patterns: patterns.len(),
        patterns_by_severity,
        locations_analyzed: locations.len(),
        fallback_locations: locations
            .iter()
            .filter(|l| l.key_source == KeySource::TrackingPrefix)
            .count(),
        suspicious_locations: locations.iter().filter(|l| l.is_suspicious).count(),
        locations_with_patterns: locations.iter().filter(|l| !l.patterns.is_empty()).count(),
        total_records: log.len(),
        total_positives: log.positive_count(),
        has_location_data: log.records().iter().any(|r| r.location_key.is_some()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::parse_timestamp;

    fn event(driver: &str, at: &str, outcome: Option<&str>) -> EventRecord {
        let record = EventRecord::new(driver, parse_timestamp(at).unwrap());
        match outcome {
            Some(category) => record.with_outcome(category),
            None => record,
        }
    }

    fn at(location: &str, driver: &str, ts: &str, outcome: Option<&str>) -> EventRecord {
        event(driver, ts, outcome).with_location(location)
    }

    #[test]
    fn test_zero_positives_scores_zero() {
        let log = EventLog::new(
            (1..=5)
                .map(|d| at("LOC_QUIET", "DRV01", &format!("2024-10-0{} 10:00:00", d), None))
                .collect(),
        );
        let report = AbuseDetector::default().analyze(&log);

        let profile = report.location("LOC_QUIET").unwrap();
        assert_eq!(profile.abuse_score, 0.0);
        assert!(profile.patterns.is_empty());
        assert!(!profile.is_suspicious);
        assert!(report.patterns.is_empty());
    }

    #[test]
    fn test_multi_actor_location() {
        let log = EventLog::new(vec![
            at("LOC_A", "DRV01", "2024-10-01 09:00:00", Some("mailbox")),
            at("LOC_A", "DRV02", "2024-10-03 13:00:00", Some("neighbor")),
            at("LOC_A", "DRV01", "2024-10-05 17:00:00", Some("mailbox")),
        ]);
        let report = AbuseDetector::default().analyze(&log);

        let multi = report
            .patterns_for_location("LOC_A")
            .find(|p| p.pattern_type == AbusePatternType::MultiActor)
            .unwrap();
        assert!(multi.severity >= Severity::Medium);
        assert_eq!(multi.drivers, vec!["DRV01", "DRV02"]);
        assert!((multi.confidence - 0.4).abs() < 1e-12);
        assert!(!multi.recommendations.is_empty());

        let profile = report.location("LOC_A").unwrap();
        // 40 (rate) + 12 (count) + 10 (drivers) + 10 (two thirds mailbox)
        assert!((profile.abuse_score - 72.0).abs() < 1e-9);
        assert!(profile.is_suspicious);

        // rate 1.0 also fires a critical high-frequency pattern, which sorts first
        assert_eq!(report.patterns[0].pattern_type, AbusePatternType::HighFrequency);
        assert_eq!(report.patterns[0].severity, Severity::Critical);
        assert_eq!(report.summary.count(Severity::Critical), 1);
    }

    #[test]
    fn test_same_day_and_time_concentration() {
        let log = EventLog::new(vec![
            at("LOC_B", "DRV01", "2024-10-01 19:05:00", Some("neighbor")),
            at("LOC_B", "DRV01", "2024-10-01 19:40:00", Some("neighbor")),
            at("LOC_B", "DRV01", "2024-10-04 19:10:00", Some("neighbor")),
            at("LOC_B", "DRV01", "2024-10-08 19:20:00", Some("neighbor")),
            at("LOC_B", "DRV01", "2024-10-09 11:00:00", None),
            at("LOC_B", "DRV01", "2024-10-10 11:00:00", None),
        ]);
        let report = AbuseDetector::default().analyze(&log);
        let found: Vec<&AbusePattern> = report.patterns_for_location("LOC_B").collect();

        let repeat = found
            .iter()
            .find(|p| p.pattern_type == AbusePatternType::SameDayRepeat)
            .unwrap();
        assert_eq!(repeat.severity, Severity::High);
        assert_eq!(repeat.unique_incidents, 3);
        assert_eq!(repeat.date_range.0, parse_timestamp("2024-10-01 19:05:00").unwrap());

        let timing = found
            .iter()
            .find(|p| p.pattern_type == AbusePatternType::TimeConcentration)
            .unwrap();
        assert_eq!(timing.severity, Severity::Medium);
        assert_eq!(timing.confidence, 1.0);
        assert!(timing.recommendations[0].contains("19:00"));

        // a single driver never makes a multi-actor pattern
        assert!(!found.iter().any(|p| p.pattern_type == AbusePatternType::MultiActor));
    }

    #[test]
    fn test_tracking_prefix_fallback() {
        let mut records: Vec<EventRecord> = (0..5)
            .map(|i| {
                let outcome = (i < 3).then_some("safe_location");
                event("DRV03", &format!("2024-10-0{} 0{}:00:00", i + 1, i + 1), outcome)
                    .with_tracking(format!("TRK0000123-{:03}", i))
            })
            .collect();
        records.push(event("DRV03", "2024-10-06 10:00:00", Some("mailbox")));
        let log = EventLog::new(records);

        let report = AbuseDetector::default().analyze(&log);
        assert!(!report.summary.has_location_data);
        assert_eq!(report.summary.fallback_locations, 1);

        let profile = report.location("TRK0000123").unwrap();
        assert_eq!(profile.key_source, KeySource::TrackingPrefix);
        assert_eq!(profile.total_events, 5);

        let pattern = &report.patterns[0];
        assert_eq!(pattern.pattern_type, AbusePatternType::HighFrequency);
        assert_eq!(pattern.severity, Severity::High);
        assert!((pattern.confidence - 0.48).abs() < 1e-12);
        assert!(pattern.recommendations.iter().any(|r| r.contains("tracking ids")));
    }

    #[test]
    fn test_small_locations_skipped() {
        let log = EventLog::new(vec![
            at("LOC_C", "DRV01", "2024-10-01 09:00:00", Some("mailbox")),
            at("LOC_C", "DRV02", "2024-10-02 09:00:00", Some("mailbox")),
        ]);
        let report = AbuseDetector::default().analyze(&log);
        assert!(report.locations.is_empty());
        assert_eq!(report.summary.total_records, 2);
        assert_eq!(report.summary.total_positives, 2);
    }

    #[test]
    fn test_score_components_and_caps() {
        let detector = AbuseDetector::default();
        let single: BTreeMap<String, usize> = [("mailbox".to_string(), 3)].into_iter().collect();
        assert!((detector.abuse_score(0.5, 3, 1, &single) - 72.0).abs() < 1e-9);
        assert_eq!(detector.abuse_score(1.0, 10, 5, &single), 100.0);

        let mixed: BTreeMap<String, usize> = [("mailbox".to_string(), 1), ("neighbor".to_string(), 1)]
            .into_iter()
            .collect();
        assert!((detector.abuse_score(0.25, 2, 1, &mixed) - 28.0).abs() < 1e-9);
        assert_eq!(detector.abuse_score(0.0, 0, 0, &BTreeMap::new()), 0.0);
    }

    fn categories(counts: &[(&str, usize)]) -> BTreeMap<String, usize> {
        counts.iter().map(|&(c, n)| (c.to_string(), n)).collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn test_score_terms_reach_their_caps() {
        let detector = AbuseDetector::default();
        let none = BTreeMap::new();

        // rate term alone: 0.9 * 80 capped at 40, plus 4 for one positive
        assert_close(detector.abuse_score(0.9, 1, 1, &none), 44.0);
        // count term: 7 * 4 capped at 20
        assert_close(detector.abuse_score(0.1, 7, 1, &none), 28.0);
        assert_close(detector.abuse_score(0.1, 4, 1, &none), 24.0);
        // driver term: (n - 1) * 10 capped at 20
        assert_close(detector.abuse_score(0.1, 1, 2, &none), 22.0);
        assert_close(detector.abuse_score(0.1, 1, 6, &none), 32.0);
    }

    #[test]
    fn test_score_category_bands() {
        let detector = AbuseDetector::default();
        let score = |counts: &[(&str, usize)]| detector.abuse_score(0.1, 1, 1, &categories(counts));

        assert_close(score(&[("mailbox", 4), ("neighbor", 1)]), 32.0);
        assert_close(score(&[("mailbox", 79), ("neighbor", 21)]), 22.0);
        assert_close(score(&[("mailbox", 3), ("neighbor", 2)]), 22.0);
        assert_close(score(&[("mailbox", 11), ("neighbor", 9)]), 12.0);
    }

    #[test]
    fn test_score_counts_every_driver_at_location() {
        let log = EventLog::new(vec![
            at("LOC_D", "DRV01", "2024-10-01 09:00:00", Some("mailbox")),
            at("LOC_D", "DRV02", "2024-10-02 10:00:00", None),
            at("LOC_D", "DRV03", "2024-10-03 11:00:00", None),
        ]);
        let report = AbuseDetector::default().analyze(&log);
        let profile = report.location("LOC_D").unwrap();

        // 80/3 (rate) + 4 (count) + 20 (three drivers) + 20 (one category)
        assert_close(profile.abuse_score, 80.0 / 3.0 + 44.0);
        assert_eq!(profile.unique_drivers, 3);
        assert_eq!(profile.drivers_with_positives, 1);
        assert!(!profile.patterns.contains(&AbusePatternType::MultiActor));
    }

    #[test]
    fn test_suspicious_rule_from_config() {
        let log = EventLog::new(vec![
            at("LOC_E", "DRV01", "2024-10-01 09:00:00", Some("mailbox")),
            at("LOC_E", "DRV02", "2024-10-02 10:00:00", None),
            at("LOC_E", "DRV03", "2024-10-03 11:00:00", None),
            at("LOC_E", "DRV04", "2024-10-04 12:00:00", None),
        ]);

        // score 20 + 4 + 20 + 20 = 64 at a 25% rate
        let by_score = AbuseDetector::default().analyze(&log);
        let profile = by_score.location("LOC_E").unwrap();
        assert_close(profile.abuse_score, 64.0);
        assert!(profile.is_suspicious);

        let by_rate = AbuseDetector::new(AbuseConfig {
            suspicious_rule: SuspiciousRule::Rate,
            ..AbuseConfig::default()
        })
        .analyze(&log);
        assert!(!by_rate.location("LOC_E").unwrap().is_suspicious);
        assert_eq!(by_rate.summary.suspicious_locations, 0);
    }

    #[test]
    fn test_ranking_and_top_suspicious() {
        let mut records = vec![
            at("LOC_HOT", "DRV01", "2024-10-01 09:00:00", Some("mailbox")),
            at("LOC_HOT", "DRV02", "2024-10-02 10:00:00", Some("mailbox")),
            at("LOC_HOT", "DRV03", "2024-10-03 11:00:00", Some("mailbox")),
        ];
        for d in 1..=4 {
            records.push(at("LOC_WARM", "DRV04", &format!("2024-10-0{} 12:00:00", d), None));
        }
        records.push(at("LOC_WARM", "DRV04", "2024-10-06 15:00:00", Some("other")));
        let report = AbuseDetector::default().analyze(&log_of(records));

        assert_eq!(report.locations[0].location_key, "LOC_HOT");
        assert_eq!(report.locations[1].location_key, "LOC_WARM");
        let top = report.top_suspicious(5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].location_key, "LOC_HOT");
        assert_eq!(report.patterns_for_location("LOC_WARM").count(), 0);
    }

    fn log_of(records: Vec<EventRecord>) -> EventLog {
        EventLog::new(records)
    }
}
