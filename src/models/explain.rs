//! Per-prediction feature attribution.
//!
//! Explainers are pluggable: the risk scorer holds a `Box<dyn Explainer>`
//! chosen from configuration, or none at all, in which case predictions
//! carry no top factors.

use crate::config::ExplainerKind;
use crate::models::booster::GradientBoostedTrees;

/// Signed per-feature contribution to one prediction
pub trait Explainer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attribution for each feature of a scaled row, in column order
    fn explain(&self, model: &GradientBoostedTrees, row: &[f64]) -> Vec<f64>;
}

/// Decision-path attribution over the boosted trees.
///
/// Every split on the path credits its feature with the change in expected
/// node value. Values are in log-odds, and
/// `base + sum(attributions) == margin` holds exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreePathExplainer;

impl TreePathExplainer {
    /// Expected margin before any split is taken
    pub fn expected_margin(&self, model: &GradientBoostedTrees) -> f64 {
        model.base_margin()
            + model
                .trees()
                .iter()
                .map(|t| t.nodes()[0].value)
                .sum::<f64>()
    }
}

impl Explainer for TreePathExplainer {
    fn name(&self) -> &'static str {
        "tree_path"
    }

    fn explain(&self, model: &GradientBoostedTrees, row: &[f64]) -> Vec<f64> {
        let mut contributions = vec![0.0; model.n_features()];
        for tree in model.trees() {
            let nodes = tree.nodes();
            let path = tree.decision_path(row);
            for step in path.windows(2) {
                let (parent, child) = (&nodes[step[0]], &nodes[step[1]]);
                if let Some(split) = &parent.split {
                    contributions[split.feature] += child.value - parent.value;
                }
            }
        }
        contributions
    }
}

/// Model-agnostic attribution against a background sample.
///
/// For feature j: P(x) minus the mean P over background rows b of x with
/// x_j replaced by b_j. Values are in probability units.
#[derive(Debug, Clone)]
pub struct PermutationExplainer {
    background: Vec<Vec<f64>>,
}

impl PermutationExplainer {
    pub fn new(background: Vec<Vec<f64>>) -> Self {
        Self { background }
    }

    pub fn background(&self) -> &[Vec<f64>] {
        &self.background
    }
}

impl Explainer for PermutationExplainer {
    fn name(&self) -> &'static str {
        "permutation"
    }

    fn explain(&self, model: &GradientBoostedTrees, row: &[f64]) -> Vec<f64> {
        if self.background.is_empty() {
            return vec![0.0; row.len()];
        }
        let baseline = model.predict_proba(row);
        let mut probe = row.to_vec();

        (0..row.len())
            .map(|j| {
                let mut total = 0.0;
                for sample in &self.background {
                    probe[j] = sample[j];
                    total += model.predict_proba(&probe);
                }
                probe[j] = row[j];
                baseline - total / self.background.len() as f64
            })
            .collect()
    }
}

/// Build the configured explainer; `None` disables attribution
pub fn build_explainer(
    kind: ExplainerKind,
    background: &[Vec<f64>],
) -> Option<Box<dyn Explainer>> {
    match kind {
        ExplainerKind::TreePath => Some(Box::new(TreePathExplainer)),
        ExplainerKind::Permutation => Some(Box::new(PermutationExplainer::new(background.to_vec()))),
        ExplainerKind::None => None,
    }
}
