//! Abuse detection result types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a detected abuse pattern, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbusePatternType {
    /// Large share of deliveries ended in a concession
    HighFrequency,
    /// Several drivers recorded concessions at the same place
    MultiActor,
    /// More than one concession on the same calendar day
    SameDayRepeat,
    /// Concessions cluster in a single hour of the day
    TimeConcentration,
}

impl AbusePatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbusePatternType::HighFrequency => "high_frequency",
            AbusePatternType::MultiActor => "multi_actor",
            AbusePatternType::SameDayRepeat => "same_day_repeat",
            AbusePatternType::TimeConcentration => "time_concentration",
        }
    }
}

/// Where a location's grouping key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// The event's location key
    Location,
    /// Prefix of the tracking id, used when no location key is present
    TrackingPrefix,
}

/// A pattern fired for one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbusePattern {
    pub pattern_id: String,
    pub location_key: String,
    pub key_source: KeySource,
    pub pattern_type: AbusePatternType,
    pub severity: Severity,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub description: String,
    pub positive_count: usize,
    pub unique_incidents: usize,
    /// Drivers who recorded a concession here, ascending
    pub drivers: Vec<String>,
    pub date_range: (NaiveDateTime, NaiveDateTime),
    pub recommendations: Vec<String>,
}

/// Aggregate view of one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProfile {
    pub location_key: String,
    pub key_source: KeySource,
    pub total_events: usize,
    pub positive_events: usize,
    pub positive_rate: f64,
    /// Distinct drivers who delivered here
    pub unique_drivers: usize,
    /// Distinct drivers with at least one concession here
    pub drivers_with_positives: usize,
    pub category_counts: BTreeMap<String, usize>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    /// Composite score in [0, 100]
    pub abuse_score: f64,
    pub is_suspicious: bool,
    pub patterns: Vec<AbusePatternType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbuseSummary {
    pub total_patterns: usize,
    pub patterns_by_severity: BTreeMap<Severity, usize>,
    pub locations_analyzed: usize,
    pub fallback_locations: usize,
    pub suspicious_locations: usize,
    pub locations_with_patterns: usize,
    pub total_records: usize,
    pub total_positives: usize,
    pub has_location_data: bool,
}

impl AbuseSummary {
    pub fn count(&self, severity: Severity) -> usize {
        self.patterns_by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// Output of one abuse analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbuseReport {
    /// Most severe first, then by confidence
    pub patterns: Vec<AbusePattern>,
    /// Ranked by abuse score, highest first
    pub locations: Vec<LocationProfile>,
    pub summary: AbuseSummary,
}

impl AbuseReport {
    /// Locations flagged suspicious, in rank order
    pub fn suspicious_locations(&self) -> impl Iterator<Item = &LocationProfile> {
        self.locations.iter().filter(|l| l.is_suspicious)
    }

    pub fn top_suspicious(&self, n: usize) -> Vec<&LocationProfile> {
        self.suspicious_locations().take(n).collect()
    }

    pub fn patterns_for_location<'a>(
        &'a self,
        location_key: &'a str,
    ) -> impl Iterator<Item = &'a AbusePattern> + 'a {
        self.patterns
            .iter()
            .filter(move |p| p.location_key == location_key)
    }

    pub fn location(&self, location_key: &str) -> Option<&LocationProfile> {
        self.locations.iter().find(|l| l.location_key == location_key)
    }
}
