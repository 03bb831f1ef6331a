//! Training label policies.
//!
//! Labels are never guessed: a policy must be configured explicitly, and a
//! policy that yields a single class fails with `LabelDiversity`.

use crate::config::{LabelingConfig, LabelingPolicyKind};
use crate::error::{AnalyticsError, Result};
use crate::feature_engineer::FeatureTable;
use crate::stats::median;

/// Derives binary training labels (1 = high risk) from a feature table
pub trait LabelingPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn label(&self, features: &FeatureTable) -> Result<Vec<u8>>;
}

/// label = feature value > threshold
#[derive(Debug, Clone)]
pub struct ThresholdLabeling {
    pub feature: String,
    pub threshold: f64,
}

impl LabelingPolicy for ThresholdLabeling {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn label(&self, features: &FeatureTable) -> Result<Vec<u8>> {
        let values = feature_column(features, &self.feature)?;
        let labels = values
            .iter()
            .map(|&v| u8::from(v > self.threshold))
            .collect();
        ensure_both_classes(labels)
    }
}

/// label = feature value > population median
#[derive(Debug, Clone)]
pub struct MedianSplitLabeling {
    pub feature: String,
}

impl LabelingPolicy for MedianSplitLabeling {
    fn name(&self) -> &'static str {
        "median_split"
    }

    fn label(&self, features: &FeatureTable) -> Result<Vec<u8>> {
        let values = feature_column(features, &self.feature)?;
        let cut = median(&values).unwrap_or(0.0);
        let labels = values.iter().map(|&v| u8::from(v > cut)).collect();
        ensure_both_classes(labels)
    }
}

/// Build the configured policy
pub fn policy_from_config(config: &LabelingConfig) -> Result<Box<dyn LabelingPolicy>> {
    match config.policy {
        LabelingPolicyKind::Threshold => {
            let threshold = config.threshold.ok_or_else(|| {
                AnalyticsError::InvalidInput(
                    "threshold labeling requires a `threshold` value".to_string(),
                )
            })?;
            Ok(Box::new(ThresholdLabeling {
                feature: config.feature.clone(),
                threshold,
            }))
        }
        LabelingPolicyKind::MedianSplit => Ok(Box::new(MedianSplitLabeling {
            feature: config.feature.clone(),
        })),
    }
}

fn feature_column(features: &FeatureTable, name: &str) -> Result<Vec<f64>> {
    features
        .column(name)
        .ok_or_else(|| AnalyticsError::schema(name, "labeling feature"))
}

/// Reject non-binary labels and label sets that contain only one class
pub fn ensure_both_classes(labels: Vec<u8>) -> Result<Vec<u8>> {
    if let Some((row, label)) = labels.iter().enumerate().find(|(_, &l)| l > 1) {
        return Err(AnalyticsError::InvalidInput(format!(
            "label {} at row {} is not binary",
            label, row
        )));
    }
    let positives = labels.iter().filter(|&&l| l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(AnalyticsError::LabelDiversity {
            positives,
            negatives,
        });
    }
    Ok(labels)
}
