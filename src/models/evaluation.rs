//! Train/test splitting, cross-validation folds and classification metrics.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Held-out evaluation of a fitted risk model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    /// [[tn, fp], [fn, tp]]
    pub confusion_matrix: [[usize; 2]; 2],
    /// ROC AUC per cross-validation fold
    pub cross_val_scores: Vec<f64>,
}

impl ModelMetrics {
    pub fn cv_mean(&self) -> f64 {
        crate::stats::mean(&self.cross_val_scores)
    }

    /// Population standard deviation of the fold scores
    pub fn cv_std(&self) -> f64 {
        if self.cross_val_scores.is_empty() {
            return 0.0;
        }
        let m = self.cv_mean();
        let var = self
            .cross_val_scores
            .iter()
            .map(|s| (s - m).powi(2))
            .sum::<f64>()
            / self.cross_val_scores.len() as f64;
        var.sqrt()
    }
}

/// Row indices of a train/test partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffled indices of each class, negatives first
fn class_indices(labels: &[u8], rng: &mut StdRng) -> [Vec<usize>; 2] {
    let mut negatives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 0).collect();
    let mut positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 1).collect();
    negatives.shuffle(rng);
    positives.shuffle(rng);
    [negatives, positives]
}

/// Stratified split keeping the class ratio in both parts.
///
/// Each class with at least two rows contributes at least one test row and
/// keeps at least one training row.
pub fn stratified_split(labels: &[u8], test_size: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::new(),
        test: Vec::new(),
    };

    for class in class_indices(labels, &mut rng) {
        let n = class.len();
        let wanted = (n as f64 * test_size.clamp(0.0, 1.0)).round() as usize;
        let n_test = if n >= 2 { wanted.clamp(1, n - 1) } else { 0 };
        split.test.extend_from_slice(&class[..n_test]);
        split.train.extend_from_slice(&class[n_test..]);
    }

    split.train.sort_unstable();
    split.test.sort_unstable();
    split
}

/// Stratified k-fold partitions; rows of each class are dealt round-robin
pub fn stratified_kfold(labels: &[u8], k: usize, seed: u64) -> Vec<Split> {
    if k < 2 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut offset = 0;
    for class in class_indices(labels, &mut rng) {
        for (i, &row) in class.iter().enumerate() {
            folds[(offset + i) % k].push(row);
        }
        offset += class.len();
    }

    (0..k)
        .map(|f| {
            let mut test = folds[f].clone();
            test.sort_unstable();
            let mut train: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != f)
                .flat_map(|(_, rows)| rows.iter().copied())
                .collect();
            train.sort_unstable();
            Split { train, test }
        })
        .collect()
}

/// [[tn, fp], [fn, tp]]
pub fn confusion_matrix(truth: &[u8], predicted: &[u8]) -> [[usize; 2]; 2] {
    let mut matrix = [[0usize; 2]; 2];
    for (&t, &p) in truth.iter().zip(predicted) {
        matrix[usize::from(t == 1)][usize::from(p == 1)] += 1;
    }
    matrix
}

pub fn accuracy(truth: &[u8], predicted: &[u8]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    correct as f64 / truth.len() as f64
}

/// Precision, recall and F1 of the positive class; 0 on zero division
pub fn precision_recall_f1(truth: &[u8], predicted: &[u8]) -> (f64, f64, f64) {
    let [[_, fp], [fn_, tp]] = confusion_matrix(truth, predicted);
    let precision = if tp + fp == 0 {
        0.0
    } else {
        tp as f64 / (tp + fp) as f64
    };
    let recall = if tp + fn_ == 0 {
        0.0
    } else {
        tp as f64 / (tp + fn_) as f64
    };
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    (precision, recall, f1)
}

/// Area under the ROC curve via the rank statistic, ties counted half.
/// None when `truth` holds a single class.
pub fn roc_auc(truth: &[u8], scores: &[f64]) -> Option<f64> {
    let positives: Vec<f64> = truth
        .iter()
        .zip(scores)
        .filter(|&(&t, _)| t == 1)
        .map(|(_, &s)| s)
        .collect();
    let negatives: Vec<f64> = truth
        .iter()
        .zip(scores)
        .filter(|&(&t, _)| t == 0)
        .map(|(_, &s)| s)
        .collect();
    if positives.is_empty() || negatives.is_empty() {
        return None;
    }

    let mut wins = 0.0;
    for p in &positives {
        for n in &negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    Some(wins / (positives.len() * negatives.len()) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stratified_split_keeps_ratio() {
        let labels: Vec<u8> = (0..50).map(|i| u8::from(i < 10)).collect();
        let split = stratified_split(&labels, 0.2, 42);

        assert_eq!(split.test.len(), 10);
        assert_eq!(split.train.len(), 40);
        let test_positives = split.test.iter().filter(|&&i| labels[i] == 1).count();
        assert_eq!(test_positives, 2);
        assert_eq!(split, stratified_split(&labels, 0.2, 42));
    }

    #[test]
    fn test_split_keeps_training_rows_for_small_classes() {
        let labels = vec![0, 0, 0, 0, 1, 1];
        let split = stratified_split(&labels, 0.2, 1);
        let train_positives = split.train.iter().filter(|&&i| labels[i] == 1).count();
        let test_positives = split.test.iter().filter(|&&i| labels[i] == 1).count();
        assert_eq!(train_positives, 1);
        assert_eq!(test_positives, 1);
    }

    #[test]
    fn test_kfold_covers_every_row_once() {
        let labels: Vec<u8> = (0..23).map(|i| u8::from(i % 4 == 0)).collect();
        let folds = stratified_kfold(&labels, 5, 3);
        assert_eq!(folds.len(), 5);

        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 23);
        }
    }

    #[test]
    fn test_classification_metrics() {
        let truth = [1, 1, 0, 0, 1];
        let predicted = [1, 0, 0, 1, 1];

        assert_eq!(confusion_matrix(&truth, &predicted), [[1, 1], [1, 2]]);
        assert!((accuracy(&truth, &predicted) - 0.6).abs() < 1e-12);
        let (p, r, f1) = precision_recall_f1(&truth, &predicted);
        assert!((p - 2.0 / 3.0).abs() < 1e-12);
        assert!((r - 2.0 / 3.0).abs() < 1e-12);
        assert!((f1 - 2.0 / 3.0).abs() < 1e-12);

        assert_eq!(precision_recall_f1(&[0, 0], &[0, 0]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]), Some(0.75));
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), Some(0.5));
        assert_eq!(roc_auc(&[1, 1], &[0.2, 0.9]), None);
    }

    #[test]
    fn test_cv_summary() {
        let metrics = ModelMetrics {
            accuracy: 1.0,
            precision: 1.0,
            recall: 1.0,
            f1: 1.0,
            roc_auc: 1.0,
            confusion_matrix: [[1, 0], [0, 1]],
            cross_val_scores: vec![0.8, 1.0],
        };
        assert!((metrics.cv_mean() - 0.9).abs() < 1e-12);
        assert!((metrics.cv_std() - 0.1).abs() < 1e-12);
    }
}
