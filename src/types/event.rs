//! Delivery event records and the event log they form.

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

const DRIVER_COLUMNS: &[&str] = &["driver_id", "transporter_id"];
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "delivery_date_time"];
const OUTCOME_COLUMNS: &[&str] = &["outcome_category", "concession_type"];
const CONTACT_COLUMNS: &[&str] = &["contact_made", "contact"];
const LOCATION_COLUMNS: &[&str] = &["location_key", "address_id"];
const TRACKING_COLUMNS: &[&str] = &["tracking_id"];

/// One delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Driver who made the attempt
    #[serde(alias = "transporter_id")]
    pub driver_id: String,

    /// Local wall-clock time of the attempt
    #[serde(alias = "delivery_date_time")]
    pub timestamp: NaiveDateTime,

    /// Concession category; present means the event is a positive
    #[serde(default, alias = "concession_type")]
    pub outcome_category: Option<String>,

    /// Whether the customer was contacted
    #[serde(default)]
    pub contact_made: Option<bool>,

    /// Delivery address or equivalent grouping key
    #[serde(default, alias = "address_id")]
    pub location_key: Option<String>,

    #[serde(default)]
    pub tracking_id: Option<String>,
}

impl EventRecord {
    /// Create a record with the required fields only
    pub fn new(driver_id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            driver_id: driver_id.into(),
            timestamp,
            outcome_category: None,
            contact_made: None,
            location_key: None,
            tracking_id: None,
        }
    }

    pub fn with_outcome(mut self, category: impl Into<String>) -> Self {
        self.outcome_category = Some(category.into());
        self
    }

    pub fn with_contact(mut self, contact_made: bool) -> Self {
        self.contact_made = Some(contact_made);
        self
    }

    pub fn with_location(mut self, location_key: impl Into<String>) -> Self {
        self.location_key = Some(location_key.into());
        self
    }

    pub fn with_tracking(mut self, tracking_id: impl Into<String>) -> Self {
        self.tracking_id = Some(tracking_id.into());
        self
    }

    /// True when the attempt ended in a concession
    pub fn is_positive(&self) -> bool {
        self.outcome_category
            .as_deref()
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    /// Day of week, Monday = 0
    pub fn weekday(&self) -> u32 {
        self.timestamp.weekday().num_days_from_monday()
    }

    pub fn is_weekend(&self) -> bool {
        self.weekday() >= 5
    }
}

/// Which optional columns the source table carried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPresence {
    pub outcome_category: bool,
    pub contact_made: bool,
    pub location_key: bool,
    pub tracking_id: bool,
}

impl ColumnPresence {
    /// Every optional column present
    pub fn all() -> Self {
        Self {
            outcome_category: true,
            contact_made: true,
            location_key: true,
            tracking_id: true,
        }
    }

    fn infer(records: &[EventRecord]) -> Self {
        Self {
            outcome_category: records.iter().any(|r| r.outcome_category.is_some()),
            contact_made: records.iter().any(|r| r.contact_made.is_some()),
            location_key: records.iter().any(|r| r.location_key.is_some()),
            tracking_id: records.iter().any(|r| r.tracking_id.is_some()),
        }
    }
}

/// Immutable table of delivery attempts
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    columns: ColumnPresence,
    dropped_rows: usize,
}

impl EventLog {
    /// Build a log from typed records, inferring optional column presence
    pub fn new(records: Vec<EventRecord>) -> Self {
        let columns = ColumnPresence::infer(&records);
        Self {
            records,
            columns,
            dropped_rows: 0,
        }
    }

    /// Build a log with explicitly declared optional columns
    pub fn with_columns(records: Vec<EventRecord>, columns: ColumnPresence) -> Self {
        Self {
            records,
            columns,
            dropped_rows: 0,
        }
    }

    /// Build a log from untyped rows.
    ///
    /// `driver_id` and `timestamp` (or their legacy names `transporter_id` and
    /// `delivery_date_time`) are required columns: a table in which no row
    /// carries one of them is a schema error. Rows where a required value is
    /// null, empty or unparseable are dropped and counted.
    pub fn from_rows(rows: &[Value]) -> Result<Self> {
        let rows = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                row.as_object().map(normalize_keys).ok_or_else(|| {
                    AnalyticsError::InvalidInput(format!("row {} is not an object", index))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for (column, names) in [("driver_id", DRIVER_COLUMNS), ("timestamp", TIMESTAMP_COLUMNS)] {
            if !rows.is_empty() && !rows.iter().any(|row| has_column(row, names)) {
                return Err(AnalyticsError::schema(
                    column,
                    format!("absent from all {} rows", rows.len()),
                ));
            }
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut columns = ColumnPresence::default();
        let mut dropped_rows = 0;

        for (index, row) in rows.iter().enumerate() {
            let Some(driver_id) = lookup(row, DRIVER_COLUMNS)
                .and_then(value_as_string)
                .filter(|s| !s.is_empty())
            else {
                warn!(row = index, "Missing driver_id, dropping row");
                dropped_rows += 1;
                continue;
            };
            let raw_timestamp = lookup(row, TIMESTAMP_COLUMNS);
            let Some(timestamp) = raw_timestamp
                .and_then(value_as_string)
                .and_then(|s| parse_timestamp(&s))
            else {
                warn!(row = index, value = ?raw_timestamp, "Unparseable timestamp, dropping row");
                dropped_rows += 1;
                continue;
            };

            columns.outcome_category |= has_column(row, OUTCOME_COLUMNS);
            columns.contact_made |= has_column(row, CONTACT_COLUMNS);
            columns.location_key |= has_column(row, LOCATION_COLUMNS);
            columns.tracking_id |= has_column(row, TRACKING_COLUMNS);

            records.push(EventRecord {
                driver_id,
                timestamp,
                outcome_category: lookup(row, OUTCOME_COLUMNS)
                    .and_then(value_as_string)
                    .filter(|s| !s.is_empty()),
                contact_made: lookup(row, CONTACT_COLUMNS).and_then(value_as_bool),
                location_key: lookup(row, LOCATION_COLUMNS).and_then(value_as_string),
                tracking_id: lookup(row, TRACKING_COLUMNS).and_then(value_as_string),
            });
        }

        Ok(Self {
            records,
            columns,
            dropped_rows,
        })
    }

    /// Parse a JSON Lines document (one object per non-blank line)
    pub fn from_json_lines(text: &str) -> Result<Self> {
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::from_rows(&rows)
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn columns(&self) -> ColumnPresence {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows discarded during construction because of bad timestamps
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn latest_timestamp(&self) -> Option<NaiveDateTime> {
        self.records.iter().map(|r| r.timestamp).max()
    }

    pub fn positive_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_positive()).count()
    }

    /// Records grouped by driver, drivers in ascending id order
    pub fn by_driver(&self) -> BTreeMap<&str, Vec<&EventRecord>> {
        let mut groups: BTreeMap<&str, Vec<&EventRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.driver_id.as_str()).or_default().push(record);
        }
        groups
    }

    /// Records of one driver, or all records when `driver_id` is None
    pub fn scoped(&self, driver_id: Option<&str>) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| driver_id.map_or(true, |id| r.driver_id == id))
            .collect()
    }

    /// Contact outcome with the documented default: None when the log has
    /// no contact column, otherwise a missing value reads as no contact.
    pub fn contact_of(&self, record: &EventRecord) -> Option<bool> {
        self.columns
            .contact_made
            .then(|| record.contact_made.unwrap_or(false))
    }
}

/// Parse the timestamp formats accepted in event tables
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn normalize_keys(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.clone()))
        .collect()
}

fn has_column(row: &Map<String, Value>, names: &[&str]) -> bool {
    names.iter().any(|name| row.contains_key(*name))
}

fn lookup<'a>(row: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| row.get(*name))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
