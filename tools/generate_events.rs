//! Synthetic Event Generator
//!
//! Writes a JSON Lines delivery log with a handful of high-risk drivers and
//! abusive locations mixed into ordinary traffic, for demos and manual runs.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

const CATEGORIES: &[&str] = &[
    "neighbor",
    "safe_location",
    "mailbox",
    "household_member",
    "receptionist",
    "other",
];

/// One delivery attempt in the input format of the analytics binary
#[derive(Debug, Clone, Serialize)]
struct Event {
    driver_id: String,
    timestamp: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome_category: Option<String>,
    contact_made: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    location_key: Option<String>,
    tracking_id: String,
}

#[derive(Parser)]
#[command(name = "generate_events")]
#[command(about = "Generate a synthetic delivery concession log", long_about = None)]
struct Args {
    /// Output file (JSON Lines)
    #[arg(short, long, default_value = "events.jsonl")]
    out: PathBuf,

    #[arg(long, default_value_t = 40)]
    drivers: usize,

    #[arg(long, default_value_t = 90)]
    days: i64,

    /// Deliveries per driver per active day
    #[arg(long, default_value_t = 25)]
    per_day: usize,

    /// Share of drivers with an elevated concession rate
    #[arg(long, default_value_t = 0.15)]
    risky_share: f64,

    /// Number of locations that attract concessions from any driver
    #[arg(long, default_value_t = 5)]
    abusive_locations: usize,

    /// First day of the log
    #[arg(long, default_value = "2024-09-01")]
    start: NaiveDate,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Event generator with a fixed seed
struct EventGenerator {
    rng: StdRng,
    tracking_counter: u64,
    location_count: usize,
    abusive_locations: usize,
}

impl EventGenerator {
    fn new(seed: u64, location_count: usize, abusive_locations: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            tracking_counter: 0,
            location_count,
            abusive_locations,
        }
    }

    fn generate(&mut self, driver_id: &str, at: NaiveDateTime, base_rate: f64) -> Event {
        self.tracking_counter += 1;
        let location = self.rng.gen_range(0..self.location_count);
        let abusive = location < self.abusive_locations;

        let rate = if abusive { 0.6 } else { base_rate };
        let outcome_category = self
            .rng
            .gen_bool(rate.clamp(0.0, 1.0))
            .then(|| self.category(abusive).to_string());
        let contact_made = if outcome_category.is_some() {
            self.rng.gen_bool(0.3)
        } else {
            self.rng.gen_bool(0.9)
        };

        // a few records arrive without a location key and rely on the tracking prefix
        let location_key = (!self.rng.gen_bool(0.05)).then(|| format!("LOC{:05}", location));

        Event {
            driver_id: driver_id.to_string(),
            timestamp: at,
            outcome_category,
            contact_made,
            location_key,
            tracking_id: format!("TRK{:05}-{:08}", location, self.tracking_counter),
        }
    }

    fn category(&mut self, abusive: bool) -> &'static str {
        if abusive && self.rng.gen_bool(0.85) {
            // abusive locations almost always ask for the same drop-off
            "safe_location"
        } else {
            CATEGORIES[self.rng.gen_range(0..CATEGORIES.len())]
        }
    }

    fn delivery_time(&mut self, day: NaiveDate, evening_bias: bool) -> Result<NaiveDateTime> {
        let hour = if evening_bias && self.rng.gen_bool(0.6) {
            self.rng.gen_range(17..20)
        } else {
            self.rng.gen_range(7..20)
        };
        let minute = self.rng.gen_range(0..60);
        day.and_hms_opt(hour, minute, 0)
            .with_context(|| format!("Invalid time {}:{:02} on {}", hour, minute, day))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_events=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(
        drivers = args.drivers,
        days = args.days,
        per_day = args.per_day,
        seed = args.seed,
        "Generating synthetic event log"
    );

    let location_count = (args.drivers * args.per_day).max(args.abusive_locations + 1);
    let mut generator = EventGenerator::new(args.seed, location_count, args.abusive_locations);
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(1));

    let file = File::create(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;
    let mut writer = BufWriter::new(file);

    let mut total = 0usize;
    let mut positives = 0usize;
    for d in 0..args.drivers {
        let driver_id = format!("DRV{:04}", d);
        let risky = rng.gen_bool(args.risky_share.clamp(0.0, 1.0));
        let base_rate = if risky {
            rng.gen_range(0.10..0.25)
        } else {
            rng.gen_range(0.01..0.05)
        };

        for offset in 0..args.days {
            let day = args.start + Duration::days(offset);
            // drivers are off roughly one day in seven
            if rng.gen_bool(1.0 / 7.0) {
                continue;
            }
            // risky drivers drift upwards over the period
            let drift = if risky { offset as f64 / args.days as f64 * 0.05 } else { 0.0 };
            for _ in 0..args.per_day {
                let at = generator.delivery_time(day, risky)?;
                let event = generator.generate(&driver_id, at, base_rate + drift);
                if event.outcome_category.is_some() {
                    positives += 1;
                }
                serde_json::to_writer(&mut writer, &event)?;
                writeln!(writer)?;
                total += 1;
            }
        }
    }
    writer.flush()?;

    info!(
        events = total,
        positives,
        path = %args.out.display(),
        "Event log written"
    );
    Ok(())
}
