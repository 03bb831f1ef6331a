//! Risk model components

pub mod booster;
pub mod evaluation;
pub mod explain;
pub mod risk_scorer;
pub mod scaler;
pub mod store;
pub mod summary;

pub use evaluation::ModelMetrics;
pub use explain::{Explainer, PermutationExplainer, TreePathExplainer};
pub use risk_scorer::{FeatureImportance, RiskScorer, TrainedModel};
pub use store::ModelStore;
pub use summary::RiskSummary;
