//! Driver risk scorer: training, batch prediction and explanations.

use crate::config::{ExplainerKind, RiskConfig};
use crate::error::{AnalyticsError, Result};
use crate::feature_engineer::FeatureTable;
use crate::labeling::ensure_both_classes;
use crate::models::booster::GradientBoostedTrees;
use crate::models::evaluation::{
    self, accuracy, confusion_matrix, precision_recall_f1, stratified_kfold, stratified_split,
    ModelMetrics,
};
use crate::models::explain::{build_explainer, Explainer};
use crate::models::scaler::StandardScaler;
use crate::models::store::ModelStore;
use crate::types::prediction::{
    FactorDirection, PredictionResult, RiskCategory, RiskThresholds, TopFactor,
};
use chrono::{NaiveDateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

/// Everything needed to reproduce predictions, persisted as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: String,
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub booster: GradientBoostedTrees,
    pub explainer: ExplainerKind,
    /// Scaled training rows used by the permutation explainer
    pub background: Vec<Vec<f64>>,
    pub trained_at: NaiveDateTime,
    pub metrics: ModelMetrics,
}

/// Gain importance of one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
    /// Running total in descending importance order
    pub cumulative: f64,
    pub rank: usize,
}

/// Binary risk classifier over driver feature tables
pub struct RiskScorer {
    config: RiskConfig,
    version: String,
    model: Option<TrainedModel>,
    explainer: Option<Box<dyn Explainer>>,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            version: DEFAULT_MODEL_VERSION.to_string(),
            model: None,
            explainer: None,
        }
    }

    /// Version string stamped on the next trained model
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn metrics(&self) -> Option<&ModelMetrics> {
        self.model.as_ref().map(|m| &m.metrics)
    }

    fn thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            medium: self.config.risk_threshold_medium,
            high: self.config.risk_threshold_high,
        }
    }

    /// Train on `features` with one binary label per row.
    ///
    /// The scaler is fitted on the training split only. Cross-validation
    /// refits scaler and model inside every fold.
    pub fn train(&mut self, features: &FeatureTable, labels: &[u8]) -> Result<ModelMetrics> {
        if labels.len() != features.len() {
            return Err(AnalyticsError::InvalidInput(format!(
                "{} labels for {} feature rows",
                labels.len(),
                features.len()
            )));
        }
        let labels = ensure_both_classes(labels.to_vec())?;
        let seed = self.config.random_state;
        let rows: Vec<&[f64]> = (0..features.len()).map(|i| features.row_at(i)).collect();

        info!(
            rows = rows.len(),
            features = features.columns().len(),
            positives = labels.iter().filter(|&&l| l == 1).count(),
            "Training risk model"
        );

        let split = stratified_split(&labels, self.config.test_size, seed);
        let (scaler, booster) = self.fit_subset(&rows, &labels, &split.train)?;

        let test_rows = scaler.transform(&pick(&rows, &split.test));
        let test_labels = pick(&labels, &split.test);
        let probabilities: Vec<f64> = test_rows.iter().map(|r| booster.predict_proba(r)).collect();
        let predicted: Vec<u8> = probabilities.iter().map(|&p| u8::from(p >= 0.5)).collect();

        let roc_auc = evaluation::roc_auc(&test_labels, &probabilities).unwrap_or_else(|| {
            warn!("Held-out split contains a single class, reporting ROC AUC 0.5");
            0.5
        });
        let (precision, recall, f1) = precision_recall_f1(&test_labels, &predicted);

        let metrics = ModelMetrics {
            accuracy: accuracy(&test_labels, &predicted),
            precision,
            recall,
            f1,
            roc_auc,
            confusion_matrix: confusion_matrix(&test_labels, &predicted),
            cross_val_scores: self.cross_validate(&rows, &labels)?,
        };

        let train_rows = scaler.transform(&pick(&rows, &split.train));
        let background = self.sample_background(train_rows);
        self.explainer = build_explainer(self.config.explainer, &background);
        self.model = Some(TrainedModel {
            version: self.version.clone(),
            feature_names: features.columns().to_vec(),
            scaler,
            booster,
            explainer: self.config.explainer,
            background,
            trained_at: Utc::now().naive_utc(),
            metrics: metrics.clone(),
        });

        info!(
            accuracy = metrics.accuracy,
            f1 = metrics.f1,
            roc_auc = metrics.roc_auc,
            cv_mean = metrics.cv_mean(),
            "Risk model trained"
        );

        Ok(metrics)
    }

    fn fit_subset(
        &self,
        rows: &[&[f64]],
        labels: &[u8],
        subset: &[usize],
    ) -> Result<(StandardScaler, GradientBoostedTrees)> {
        let subset_rows = pick(rows, subset);
        let scaler = StandardScaler::fit(&subset_rows);
        let scaled = scaler.transform(&subset_rows);
        let booster = GradientBoostedTrees::fit(
            &scaled,
            &pick(labels, subset),
            &self.config.booster,
            self.config.random_state,
        )?;
        Ok((scaler, booster))
    }

    /// ROC AUC per stratified fold; empty when the minority class is too small
    fn cross_validate(&self, rows: &[&[f64]], labels: &[u8]) -> Result<Vec<f64>> {
        let minority = labels
            .iter()
            .filter(|&&l| l == 1)
            .count()
            .min(labels.iter().filter(|&&l| l == 0).count());
        let k = self.config.cross_validation_folds.min(minority);
        if k < 2 {
            warn!(
                minority,
                "Too few minority-class rows for cross-validation, skipping"
            );
            return Ok(Vec::new());
        }

        let folds = stratified_kfold(labels, k, self.config.random_state);
        folds
            .par_iter()
            .map(|fold| {
                let (scaler, booster) = self.fit_subset(rows, labels, &fold.train)?;
                let scores: Vec<f64> = pick(rows, &fold.test)
                    .iter()
                    .map(|r| booster.predict_proba(&scaler.transform_row(r)))
                    .collect();
                Ok(evaluation::roc_auc(&pick(labels, &fold.test), &scores).unwrap_or(0.5))
            })
            .collect()
    }

    fn sample_background(&self, mut rows: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        if self.config.explainer != ExplainerKind::Permutation {
            return Vec::new();
        }
        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        rows.shuffle(&mut rng);
        rows.truncate(self.config.background_size);
        rows
    }

    /// Predict every row of `features`, in table order.
    ///
    /// Columns must equal the trained feature names exactly, order included.
    pub fn predict(&self, features: &FeatureTable) -> Result<Vec<PredictionResult>> {
        let model = self.model.as_ref().ok_or(AnalyticsError::ModelNotTrained)?;
        if features.columns() != model.feature_names.as_slice() {
            return Err(AnalyticsError::FeatureSchemaMismatch {
                expected: model.feature_names.clone(),
                actual: features.columns().to_vec(),
            });
        }

        let thresholds = self.thresholds();
        let results: Vec<PredictionResult> = features
            .iter()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|&(driver_id, values)| self.predict_row(model, &thresholds, driver_id, values))
            .collect();

        debug!(drivers = results.len(), "Risk predictions computed");
        Ok(results)
    }

    /// Predict a single driver's feature vector (columns in trained order)
    pub fn predict_single(&self, driver_id: &str, values: &[f64]) -> Result<PredictionResult> {
        let model = self.model.as_ref().ok_or(AnalyticsError::ModelNotTrained)?;
        let table = FeatureTable::from_rows(
            model.feature_names.clone(),
            vec![(driver_id.to_string(), values.to_vec())],
        )?;
        self.predict(&table)?
            .pop()
            .ok_or_else(|| AnalyticsError::InvalidInput("empty prediction".to_string()))
    }

    fn predict_row(
        &self,
        model: &TrainedModel,
        thresholds: &RiskThresholds,
        driver_id: &str,
        values: &[f64],
    ) -> PredictionResult {
        let scaled = model.scaler.transform_row(values);
        let probability = model.booster.predict_proba(&scaled);
        let risk_score = probability * 100.0;

        let top_factors = match &self.explainer {
            Some(explainer) => {
                let attributions = explainer.explain(&model.booster, &scaled);
                let mut ranked: Vec<(usize, f64)> = attributions.into_iter().enumerate().collect();
                ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then(a.0.cmp(&b.0)));
                ranked
                    .into_iter()
                    .take(self.config.top_factors)
                    .map(|(j, impact)| TopFactor {
                        feature: model.feature_names[j].clone(),
                        impact,
                        direction: FactorDirection::from_impact(impact),
                        value: values[j],
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        PredictionResult {
            driver_id: driver_id.to_string(),
            risk_score: round_to(risk_score, 1),
            risk_category: RiskCategory::from_score(risk_score, thresholds),
            probability: round_to(probability, 4),
            top_factors,
            confidence: round_to((probability - 0.5).abs() * 2.0, 3),
        }
    }

    /// Gain importance per feature, most important first
    pub fn feature_importance(&self) -> Result<Vec<FeatureImportance>> {
        let model = self.model.as_ref().ok_or(AnalyticsError::ModelNotTrained)?;
        let mut ranked: Vec<(String, f64)> = model
            .feature_names
            .iter()
            .cloned()
            .zip(model.booster.feature_importance())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut cumulative = 0.0;
        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(i, (feature, importance))| {
                cumulative += importance;
                FeatureImportance {
                    feature,
                    importance,
                    cumulative,
                    rank: i + 1,
                }
            })
            .collect())
    }

    /// Top `n` predictions by risk score; ties keep driver id order
    pub fn high_risk_drivers(predictions: &[PredictionResult], top_n: usize) -> Vec<PredictionResult> {
        let mut sorted = predictions.to_vec();
        sorted.sort_by(|a, b| {
            b.risk_score
                .total_cmp(&a.risk_score)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        sorted.truncate(top_n);
        sorted
    }

    /// Persist the trained model under `dir`; returns the artifact path
    pub fn save(&self, dir: impl AsRef<Path>, version: Option<&str>) -> Result<PathBuf> {
        let model = self.model.as_ref().ok_or(AnalyticsError::ModelNotTrained)?;
        ModelStore::new(dir.as_ref()).save(model, version)
    }

    /// Restore a model from `dir`; the latest version when none is given
    pub fn load(&mut self, dir: impl AsRef<Path>, version: Option<&str>) -> Result<()> {
        let model = ModelStore::new(dir.as_ref()).load(version)?;
        self.explainer = build_explainer(model.explainer, &model.background);
        self.version = model.version.clone();
        info!(version = %model.version, features = model.feature_names.len(), "Risk model loaded");
        self.model = Some(model);
        Ok(())
    }
}

fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
