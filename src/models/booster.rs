//! Gradient-boosted decision trees for binary classification.
//!
//! Second-order boosting on the logistic loss with exact greedy splits:
//! every tree is grown on the gradient/hessian of the current margin, with
//! L1/L2 regularised leaf weights, a minimum split gain (`gamma`), a
//! minimum child hessian (`min_child_weight`) and per-tree row and column
//! sampling driven by a seeded RNG. Fitting is fully deterministic for a
//! given seed.

use crate::config::BoosterParams;
use crate::error::{AnalyticsError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROBABILITY_EPS: f64 = 1e-6;
const MIN_HESSIAN: f64 = 1e-16;

/// Split decision of an internal node; rows with `x[feature] < threshold` go left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Loss reduction achieved by the split
    pub gain: f64,
}

/// Tree node. Leaves carry the (shrunken) output weight; internal nodes
/// carry the cover-weighted mean of their subtree's leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub split: Option<Split>,
    pub value: f64,
    /// Hessian sum of the training rows that reached the node
    pub cover: f64,
}

/// One regression tree over the margin; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node indices from the root to the leaf reached by `row`
    pub fn decision_path(&self, row: &[f64]) -> Vec<usize> {
        let mut path = vec![0];
        let mut current = 0;
        while let Some(split) = &self.nodes[current].split {
            current = if row[split.feature] < split.threshold {
                split.left
            } else {
                split.right
            };
            path.push(current);
        }
        path
    }

    /// Leaf output for `row`
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut current = 0;
        while let Some(split) = &self.nodes[current].split {
            current = if row[split.feature] < split.threshold {
                split.left
            } else {
                split.right
            };
        }
        self.nodes[current].value
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index].split {
                Some(split) => 1 + walk(nodes, split.left).max(walk(nodes, split.right)),
                None => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Fitted boosted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_margin: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    /// Fit on `rows` (already scaled) with binary `labels`
    pub fn fit(rows: &[Vec<f64>], labels: &[u8], params: &BoosterParams, seed: u64) -> Result<Self> {
        if rows.is_empty() {
            return Err(AnalyticsError::InvalidInput(
                "cannot fit on an empty training set".to_string(),
            ));
        }
        if rows.len() != labels.len() {
            return Err(AnalyticsError::InvalidInput(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let n_features = rows[0].len();
        if rows.iter().any(|r| r.len() != n_features) {
            return Err(AnalyticsError::InvalidInput(
                "training rows have inconsistent widths".to_string(),
            ));
        }

        let weights: Vec<f64> = labels
            .iter()
            .map(|&y| if y == 1 { params.scale_pos_weight } else { 1.0 })
            .collect();
        let positive_weight: f64 = labels
            .iter()
            .zip(&weights)
            .filter(|&(&y, _)| y == 1)
            .map(|(_, w)| w)
            .sum();
        let base_rate = (positive_weight / weights.iter().sum::<f64>())
            .clamp(PROBABILITY_EPS, 1.0 - PROBABILITY_EPS);
        let base_margin = (base_rate / (1.0 - base_rate)).ln();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut margins = vec![base_margin; rows.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        let n_rows_sampled = sample_size(rows.len(), params.subsample);
        let n_cols_sampled = sample_size(n_features, params.colsample_bytree);

        for round in 0..params.n_estimators {
            let mut grad = vec![0.0; rows.len()];
            let mut hess = vec![0.0; rows.len()];
            for i in 0..rows.len() {
                let p = sigmoid(margins[i]);
                grad[i] = (p - f64::from(labels[i])) * weights[i];
                hess[i] = (p * (1.0 - p) * weights[i]).max(MIN_HESSIAN);
            }

            let mut row_ids: Vec<usize> = (0..rows.len()).collect();
            row_ids.shuffle(&mut rng);
            row_ids.truncate(n_rows_sampled);

            let mut features: Vec<usize> = (0..n_features).collect();
            features.shuffle(&mut rng);
            features.truncate(n_cols_sampled);
            features.sort_unstable();

            let tree = TreeBuilder {
                rows,
                grad: &grad,
                hess: &hess,
                features: &features,
                params,
                nodes: Vec::new(),
            }
            .build(row_ids);

            for (margin, row) in margins.iter_mut().zip(rows) {
                *margin += tree.predict(row);
            }
            debug!(round, depth = tree.depth(), nodes = tree.nodes.len(), "Tree fitted");
            trees.push(tree);
        }

        Ok(Self {
            base_margin,
            n_features,
            trees,
        })
    }

    pub fn base_margin(&self) -> f64 {
        self.base_margin
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Raw log-odds for one row
    pub fn predict_margin(&self, row: &[f64]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    /// P(label = 1) for one row
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.predict_margin(row))
    }

    /// Average split gain per feature, normalised to sum to 1
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut total_gain = vec![0.0; self.n_features];
        let mut splits = vec![0usize; self.n_features];
        for split in self
            .trees
            .iter()
            .flat_map(|t| t.nodes.iter())
            .filter_map(|n| n.split.as_ref())
        {
            total_gain[split.feature] += split.gain;
            splits[split.feature] += 1;
        }

        let average: Vec<f64> = total_gain
            .iter()
            .zip(&splits)
            .map(|(&g, &n)| if n == 0 { 0.0 } else { g / n as f64 })
            .collect();
        let sum: f64 = average.iter().sum();
        if sum <= 0.0 {
            return average;
        }
        average.into_iter().map(|g| g / sum).collect()
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn sample_size(total: usize, fraction: f64) -> usize {
    ((total as f64 * fraction.clamp(0.0, 1.0)).floor() as usize).clamp(1, total.max(1))
}

struct CandidateSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a BoosterParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(mut self, row_ids: Vec<usize>) -> Tree {
        self.grow(row_ids, 0);

        // children always follow their parent, so a reverse sweep sees them first
        for index in (0..self.nodes.len()).rev() {
            let Some(split) = &self.nodes[index].split else {
                continue;
            };
            let (left, right) = (&self.nodes[split.left], &self.nodes[split.right]);
            let cover = left.cover + right.cover;
            if cover <= 0.0 {
                continue;
            }
            let value = (left.cover * left.value + right.cover * right.value) / cover;
            self.nodes[index].value = value;
        }

        Tree { nodes: self.nodes }
    }

    fn grow(&mut self, row_ids: Vec<usize>, depth: usize) -> usize {
        let g: f64 = row_ids.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = row_ids.iter().map(|&i| self.hess[i]).sum();

        let id = self.nodes.len();
        self.nodes.push(Node {
            split: None,
            value: self.leaf_weight(g, h) * self.params.learning_rate,
            cover: h,
        });

        if depth >= self.params.max_depth || row_ids.len() < 2 {
            return id;
        }
        let Some(best) = self.best_split(&row_ids, g, h) else {
            return id;
        };

        let (left_ids, right_ids): (Vec<usize>, Vec<usize>) = row_ids
            .iter()
            .partition(|&&i| self.rows[i][best.feature] < best.threshold);
        let left = self.grow(left_ids, depth + 1);
        let right = self.grow(right_ids, depth + 1);

        self.nodes[id].split = Some(Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
            gain: best.gain,
        });
        id
    }

    fn best_split(&self, row_ids: &[usize], g: f64, h: f64) -> Option<CandidateSplit> {
        let parent_score = self.score(g, h);
        let mut best: Option<CandidateSplit> = None;

        for &feature in self.features {
            let mut sorted = row_ids.to_vec();
            sorted.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

            let mut gl = 0.0;
            let mut hl = 0.0;
            for pair in sorted.windows(2) {
                let (current, next) = (pair[0], pair[1]);
                gl += self.grad[current];
                hl += self.hess[current];

                let x = self.rows[current][feature];
                let x_next = self.rows[next][feature];
                if x >= x_next {
                    continue;
                }
                let hr = h - hl;
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = 0.5 * (self.score(gl, hl) + self.score(g - gl, hr) - parent_score)
                    - self.params.gamma;
                if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mid = x + (x_next - x) / 2.0;
                    let threshold = if mid <= x { x_next } else { mid };
                    best = Some(CandidateSplit {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }

        best
    }

    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -soft_threshold(g, self.params.reg_alpha) / (h + self.params.reg_lambda)
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        soft_threshold(g, self.params.reg_alpha).powi(2) / (h + self.params.reg_lambda)
    }
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    g.signum() * (g.abs() - alpha).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BoosterParams {
        BoosterParams {
            n_estimators: 30,
            max_depth: 3,
            learning_rate: 0.3,
            min_child_weight: 0.5,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..BoosterParams::default()
        }
    }

    /// Label is 1 when the first feature exceeds 0.5; the second is noise
    fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![i as f64 / 40.0, ((i * 7) % 11) as f64])
            .collect();
        let labels = rows.iter().map(|r| u8::from(r[0] > 0.5)).collect();
        (rows, labels)
    }

    #[test]
    fn test_learns_separable_data() {
        let (rows, labels) = separable();
        let model = GradientBoostedTrees::fit(&rows, &labels, &params(), 42).unwrap();

        assert!(model.predict_proba(&[0.9, 3.0]) > 0.8);
        assert!(model.predict_proba(&[0.1, 3.0]) < 0.2);
        assert_eq!(model.trees().len(), 30);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (rows, labels) = separable();
        let a = GradientBoostedTrees::fit(&rows, &labels, &params(), 7).unwrap();
        let b = GradientBoostedTrees::fit(&rows, &labels, &params(), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_depth_respects_limit() {
        let (rows, labels) = separable();
        let model = GradientBoostedTrees::fit(&rows, &labels, &params(), 42).unwrap();
        assert!(model.trees().iter().all(|t| t.depth() <= 3));
    }

    #[test]
    fn test_importance_prefers_informative_feature() {
        let (rows, labels) = separable();
        let model = GradientBoostedTrees::fit(&rows, &labels, &params(), 42).unwrap();
        let importance = model.feature_importance();

        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importance[0] > importance[1]);
    }

    #[test]
    fn test_internal_values_are_cover_weighted() {
        let (rows, labels) = separable();
        let model = GradientBoostedTrees::fit(&rows, &labels, &params(), 42).unwrap();
        let tree = &model.trees()[0];
        let root = &tree.nodes()[0];
        let split = root.split.as_ref().unwrap();
        let (left, right) = (&tree.nodes()[split.left], &tree.nodes()[split.right]);

        let expected = (left.cover * left.value + right.cover * right.value) / (left.cover + right.cover);
        assert!((root.value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let rows = vec![vec![1.0], vec![2.0]];
        assert!(GradientBoostedTrees::fit(&rows, &[1], &params(), 0).is_err());
        assert!(GradientBoostedTrees::fit(&[], &[], &params(), 0).is_err());
    }
}
