//! Run metrics for one analytics pass: stage timings, entity counts,
//! abuse patterns by severity and the risk score distribution.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for an analytics run
pub struct RunMetrics {
    /// Event records loaded
    pub events_processed: AtomicU64,
    /// Drivers with a feature row
    pub drivers_profiled: AtomicU64,
    /// Predictions produced by the risk scorer
    pub drivers_scored: AtomicU64,
    /// Locations that met the abuse minimum
    pub locations_analyzed: AtomicU64,
    patterns_by_severity: RwLock<BTreeMap<String, u64>>,
    /// Wall time per stage, in execution order
    stage_times: RwLock<Vec<(String, Duration)>>,
    /// Risk score distribution, ten buckets over [0, 100]
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            drivers_profiled: AtomicU64::new(0),
            drivers_scored: AtomicU64::new(0),
            locations_analyzed: AtomicU64::new(0),
            patterns_by_severity: RwLock::new(BTreeMap::new()),
            stage_times: RwLock::new(Vec::new()),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_events(&self, count: usize) {
        self.events_processed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_drivers(&self, count: usize) {
        self.drivers_profiled.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_locations(&self, count: usize) {
        self.locations_analyzed.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record one risk score on the 0-100 scale
    pub fn record_risk_score(&self, risk_score: f64) {
        self.drivers_scored.fetch_add(1, Ordering::Relaxed);

        let bucket = (risk_score / 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_pattern(&self, severity: &str) {
        if let Ok(mut by_severity) = self.patterns_by_severity.write() {
            *by_severity.entry(severity.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_stage(&self, stage: &str, duration: Duration) {
        if let Ok(mut times) = self.stage_times.write() {
            times.push((stage.to_string(), duration));
        }
    }

    /// Run `f` and record its wall time under `stage`
    pub fn time_stage<T>(&self, stage: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        self.record_stage(stage, started.elapsed());
        out
    }

    pub fn stage_times(&self) -> Vec<(String, Duration)> {
        self.stage_times
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or_default()
    }

    pub fn patterns_by_severity(&self) -> BTreeMap<String, u64> {
        self.patterns_by_severity
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Serializable copy of the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            drivers_profiled: self.drivers_profiled.load(Ordering::Relaxed),
            drivers_scored: self.drivers_scored.load(Ordering::Relaxed),
            locations_analyzed: self.locations_analyzed.load(Ordering::Relaxed),
            patterns_by_severity: self.patterns_by_severity(),
            stage_ms: self
                .stage_times()
                .into_iter()
                .map(|(stage, d)| (stage, d.as_secs_f64() * 1000.0))
                .collect(),
            score_distribution: self.score_distribution(),
            total_ms: self.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║          CONCESSION ANALYTICS - RUN SUMMARY                  ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Events: {:>8}  │  Drivers: {:>6}  │  Scored: {:>6}        ║",
            snapshot.events_processed, snapshot.drivers_profiled, snapshot.drivers_scored
        );
        info!(
            "║ Locations analyzed: {:>6}  │  Total time: {:>8.1} ms       ║",
            snapshot.locations_analyzed, snapshot.total_ms
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Stage Timings (ms):                                          ║");
        for (stage, ms) in &snapshot.stage_ms {
            info!("║   {:20}: {:>10.2}                              ║", stage, ms);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Abuse Patterns by Severity:                                  ║");
        for (severity, count) in &snapshot.patterns_by_severity {
            info!("║   {:10}: {:>6}                                          ║", severity, count);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = snapshot.score_distribution.iter().sum();
        for (i, &count) in snapshot.score_distribution.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:>3}-{:<3}: {:>6} ({:>5.1}%) {}",
                i * 10,
                (i + 1) * 10,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metric values, written into the run report
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: u64,
    pub drivers_profiled: u64,
    pub drivers_scored: u64,
    pub locations_analyzed: u64,
    pub patterns_by_severity: BTreeMap<String, u64>,
    pub stage_ms: Vec<(String, f64)>,
    pub score_distribution: [u64; 10],
    pub total_ms: f64,
}
