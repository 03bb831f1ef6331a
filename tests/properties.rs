use chrono::{Duration, NaiveDateTime};
use concession_analytics::abuse::AbuseDetector;
use concession_analytics::feature_engineer::{FeatureEngineer, FeatureTable};
use concession_analytics::patterns::{AnomalyMethod, PatternAnalyzer};
use concession_analytics::types::event::parse_timestamp;
use concession_analytics::types::{EventLog, EventRecord};
use proptest::prelude::*;

const CATEGORIES: [&str; 3] = ["neighbor", "mailbox", "safe_location"];

fn origin() -> NaiveDateTime {
    parse_timestamp("2024-06-01 00:00:00").unwrap()
}

/// (driver, day offset, hour, minute, category or none, contact, location)
type RawEvent = (usize, i64, i64, i64, Option<usize>, bool, usize);

fn arb_event() -> impl Strategy<Value = RawEvent> {
    (
        0usize..4,
        0i64..120,
        0i64..24,
        0i64..60,
        prop::option::of(0usize..CATEGORIES.len()),
        any::<bool>(),
        0usize..6,
    )
}

fn build(raw: &[RawEvent]) -> Vec<EventRecord> {
    raw.iter()
        .map(|&(driver, day, hour, minute, category, contact, location)| {
            let at = origin() + Duration::days(day) + Duration::hours(hour) + Duration::minutes(minute);
            let mut record = EventRecord::new(format!("DRV{}", driver), at)
                .with_contact(contact)
                .with_location(format!("LOC{}", location));
            if let Some(c) = category {
                record = record.with_outcome(CATEGORIES[c]);
            }
            record
        })
        .collect()
}

fn value(table: &FeatureTable, driver: &str, column: &str) -> f64 {
    table.get(driver, column).unwrap()
}

const BOUNDED_COLUMNS: &[&str] = &[
    "active_days_ratio",
    "contact_success_rate",
    "morning_peak_ratio",
    "evening_peak_ratio",
    "weekend_ratio",
    "improving_flag",
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn window_counts_are_monotonic(raw in prop::collection::vec(arb_event(), 1..150), ref_day in 0i64..150) {
        let log = EventLog::new(build(&raw));
        let reference = origin() + Duration::days(ref_day);
        let table = FeatureEngineer::default().transform(&log, Some(reference), None).unwrap();

        for driver in table.index() {
            for kind in ["delivery_count", "concession_count"] {
                let c7 = value(&table, driver, &format!("{}_7d", kind));
                let c30 = value(&table, driver, &format!("{}_30d", kind));
                let c90 = value(&table, driver, &format!("{}_90d", kind));
                prop_assert!(c7 >= 0.0);
                prop_assert!(c7 <= c30, "{} 7d {} > 30d {}", kind, c7, c30);
                prop_assert!(c30 <= c90, "{} 30d {} > 90d {}", kind, c30, c90);
            }
        }
    }

    #[test]
    fn rates_stay_in_unit_interval(raw in prop::collection::vec(arb_event(), 1..150)) {
        let log = EventLog::new(build(&raw));
        let table = FeatureEngineer::default().transform(&log, None, None).unwrap();

        for column in table.columns() {
            let bounded = column.starts_with("concession_rate_")
                || column.starts_with("pct_")
                || BOUNDED_COLUMNS.contains(&column.as_str());
            if !bounded {
                continue;
            }
            for v in table.column(column).unwrap() {
                prop_assert!((0.0..=1.0).contains(&v), "{} = {}", column, v);
            }
        }
        for (_, row) in table.iter() {
            prop_assert!(row.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn row_order_does_not_change_features(raw in prop::collection::vec(arb_event(), 1..120)) {
        let records = build(&raw);
        let mut reversed = records.clone();
        reversed.reverse();

        let engineer = FeatureEngineer::default();
        let forward = engineer.transform(&EventLog::new(records), None, None).unwrap();
        let backward = engineer.transform(&EventLog::new(reversed), None, None).unwrap();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn abuse_scores_are_bounded(raw in prop::collection::vec(arb_event(), 1..150)) {
        let report = AbuseDetector::default().analyze(&EventLog::new(build(&raw)));

        for location in &report.locations {
            prop_assert!((0.0..=100.0).contains(&location.abuse_score));
            if location.positive_events == 0 {
                prop_assert_eq!(location.abuse_score, 0.0);
            }
        }
        prop_assert!(report
            .locations
            .windows(2)
            .all(|w| w[0].abuse_score >= w[1].abuse_score));
    }

    #[test]
    fn zero_contamination_flags_nobody(rows in prop::collection::vec(prop::collection::vec(0.0f64..1.0, 3), 10..40)) {
        let columns = vec!["concession_rate_30d".to_string(), "a".to_string(), "b".to_string()];
        let table = FeatureTable::from_rows(
            columns,
            rows.into_iter().enumerate().map(|(i, r)| (format!("D{}", i), r)).collect(),
        )
        .unwrap();
        let anomalies = PatternAnalyzer::default().detect_anomalies(&table, AnomalyMethod::Contamination(0.0));
        prop_assert!(anomalies.is_empty());
    }
}
