//! Concession Analytics - Main Entry Point
//!
//! Loads an event log, builds driver features, trains or loads the risk
//! model, runs the pattern and abuse detectors and writes one JSON report.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use clap::Parser;
use concession_analytics::{
    abuse::{AbuseDetector, AbuseReport},
    config::AppConfig,
    feature_engineer::{FeatureEngineer, FeatureTable},
    labeling::policy_from_config,
    metrics::{MetricsSnapshot, RunMetrics},
    models::{FeatureImportance, ModelMetrics, RiskScorer, RiskSummary},
    patterns::{
        AnomalyResult, ChangePoint, ClusterResult, CorrelationAnalysis, Pattern, PatternAnalyzer,
        TimeHeatmap, TrendAnalysis,
    },
    types::{EventLog, PredictionResult},
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

#[derive(Parser)]
#[command(name = "concession-analytics")]
#[command(version)]
#[command(about = "Driver risk, pattern and customer-abuse analytics over concession logs", long_about = None)]
struct Cli {
    /// Event log in JSON Lines format
    #[arg(value_name = "EVENTS")]
    events: PathBuf,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report destination (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Directory for risk model artifacts
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Load a saved model from --model-dir instead of training
    #[arg(long)]
    load_model: bool,

    /// Model version to load or save (latest / default when omitted)
    #[arg(long)]
    model_version: Option<String>,

    /// Restrict time patterns, trend and change points to one driver
    #[arg(long)]
    driver: Option<String>,

    /// Trend window in days
    #[arg(long, default_value_t = 30)]
    trend_window: u32,

    /// Number of high-risk drivers and suspicious locations listed
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Include the full feature table in the report
    #[arg(long)]
    include_features: bool,
}

/// Everything one run produces
#[derive(Serialize)]
struct AnalysisReport {
    run_id: Uuid,
    generated_at: NaiveDateTime,
    events: usize,
    dropped_rows: usize,
    drivers: usize,
    feature_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<FeatureTable>,
    risk: Option<RiskSection>,
    patterns: PatternSection,
    abuse: AbuseReport,
    metrics: MetricsSnapshot,
}

#[derive(Serialize)]
struct RiskSection {
    model_version: String,
    model_metrics: Option<ModelMetrics>,
    summary: RiskSummary,
    high_risk: Vec<PredictionResult>,
    feature_importance: Vec<FeatureImportance>,
    predictions: Vec<PredictionResult>,
}

#[derive(Serialize)]
struct PatternSection {
    driver: Option<String>,
    time_patterns: Vec<Pattern>,
    trend: TrendAnalysis,
    change_points: Vec<ChangePoint>,
    anomalies: Vec<AnomalyResult>,
    clusters: ClusterResult,
    correlations: CorrelationAnalysis,
    heatmap: TimeHeatmap,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config)?;

    info!("Starting Concession Analytics");

    if config.pipeline.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.pipeline.workers)
            .build_global()
            .context("Failed to configure worker pool")?;
    }
    info!(workers = rayon::current_num_threads(), "Worker pool ready");

    let metrics = RunMetrics::new();

    let text = std::fs::read_to_string(&cli.events)
        .with_context(|| format!("Failed to read event log {}", cli.events.display()))?;
    let log = metrics
        .time_stage("load", || EventLog::from_json_lines(&text))
        .context("Failed to parse event log")?;
    metrics.record_events(log.len());
    if log.dropped_rows() > 0 {
        warn!(dropped = log.dropped_rows(), "Rows with unparseable timestamps were dropped");
    }
    info!(events = log.len(), positives = log.positive_count(), "Event log loaded");

    let engineer = FeatureEngineer::new(config.features.clone());
    let features = metrics
        .time_stage("features", || engineer.transform(&log, None, None))
        .context("Feature engineering failed")?;
    metrics.record_drivers(features.len());
    info!(
        drivers = features.len(),
        features = engineer.feature_count(),
        "Feature table built"
    );

    let risk = metrics.time_stage("risk", || run_risk(&cli, &config, &features, &metrics))?;

    let analyzer = PatternAnalyzer::new(config.patterns.clone());
    let patterns = metrics.time_stage("patterns", || {
        let driver = cli.driver.as_deref();
        PatternSection {
            driver: cli.driver.clone(),
            time_patterns: analyzer.detect_time_patterns(&log, driver),
            trend: analyzer.analyze_trend(&log, cli.trend_window, driver),
            change_points: analyzer.detect_change_points(&log, driver),
            anomalies: analyzer.detect_anomalies(&features, analyzer.anomaly_method()),
            clusters: analyzer.cluster_entities(&features, None),
            correlations: analyzer.analyze_correlations(&features),
            heatmap: analyzer.time_heatmap(&log),
        }
    });
    info!(
        time_patterns = patterns.time_patterns.len(),
        trend = patterns.trend.direction.as_str(),
        anomalies = patterns.anomalies.len(),
        buckets = patterns.clusters.n_clusters,
        "Pattern analysis complete"
    );

    let detector = AbuseDetector::new(config.abuse.clone());
    let abuse = metrics.time_stage("abuse", || detector.analyze(&log));
    metrics.record_locations(abuse.locations.len());
    for pattern in &abuse.patterns {
        metrics.record_pattern(pattern.severity.as_str());
    }
    for location in abuse.top_suspicious(cli.top) {
        info!(
            location = %location.location_key,
            score = location.abuse_score,
            positives = location.positive_events,
            "Suspicious location"
        );
    }

    let report = AnalysisReport {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now().naive_utc(),
        events: log.len(),
        dropped_rows: log.dropped_rows(),
        drivers: features.len(),
        feature_names: features.columns().to_vec(),
        features: cli.include_features.then(|| features.clone()),
        risk,
        patterns,
        abuse,
        metrics: metrics.snapshot(),
    };
    write_report(&report, cli.out.as_deref())?;

    metrics.print_summary();
    Ok(())
}

/// Explicit path, else the default file when present, else built-in defaults
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => AppConfig::load(),
        None => Ok(AppConfig::default()),
    }
}

/// Logs go to stderr so a report on stdout stays parseable
fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;

    match config.logging.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
    Ok(())
}

fn run_risk(
    cli: &Cli,
    config: &AppConfig,
    features: &FeatureTable,
    metrics: &RunMetrics,
) -> Result<Option<RiskSection>> {
    let mut scorer = RiskScorer::new(config.risk.clone());
    if let Some(version) = &cli.model_version {
        scorer = scorer.with_version(version.clone());
    }

    if cli.load_model {
        let Some(dir) = &cli.model_dir else {
            bail!("--load-model requires --model-dir");
        };
        scorer
            .load(dir, cli.model_version.as_deref())
            .context("Failed to load risk model")?;
    } else if let Some(labeling) = &config.labeling {
        let policy = policy_from_config(labeling)?;
        let labels = policy.label(features).context("Failed to derive training labels")?;
        let model_metrics = scorer.train(features, &labels).context("Risk model training failed")?;
        info!(
            policy = policy.name(),
            roc_auc = model_metrics.roc_auc,
            cv_mean = model_metrics.cv_mean(),
            "Risk model trained"
        );
        if let Some(dir) = &cli.model_dir {
            let path = scorer
                .save(dir, cli.model_version.as_deref())
                .context("Failed to save risk model")?;
            info!(path = %path.display(), "Risk model saved");
        }
    } else {
        info!("No labeling policy configured, skipping risk scoring");
        return Ok(None);
    }

    let predictions = scorer.predict(features).context("Risk prediction failed")?;
    for prediction in &predictions {
        metrics.record_risk_score(prediction.risk_score);
    }
    let summary = RiskSummary::from_predictions(&predictions);
    info!(
        drivers = summary.total_drivers,
        high = summary.high_risk_count,
        medium = summary.medium_risk_count,
        "Risk scoring complete"
    );

    Ok(Some(RiskSection {
        model_version: scorer
            .model()
            .map(|m| m.version.clone())
            .unwrap_or_default(),
        model_metrics: scorer.metrics().cloned(),
        summary,
        high_risk: RiskScorer::high_risk_drivers(&predictions, cli.top),
        feature_importance: scorer.feature_importance()?,
        predictions,
    }))
}

fn write_report(report: &AnalysisReport, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create report {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, report).context("Failed to write report")?;
            writer.flush()?;
            info!(path = %path.display(), "Report written");
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, report).context("Failed to write report")?;
            writeln!(handle)?;
        }
    }
    Ok(())
}
