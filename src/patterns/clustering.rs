use super::types::{ClusterProfile, ClusterResult};
use super::PatternAnalyzer;
use crate::feature_engineer::FeatureTable;
use crate::stats::{mean, quantile};
use std::collections::BTreeMap;
use tracing::debug;

/// Bucket names from the lowest to the highest headline rate
const BUCKET_NAMES: [&str; 5] = ["High Performers", "Consistent", "Mixed", "At Risk", "Priority"];

const PROFILE_MEMBERS: usize = 5;

impl PatternAnalyzer {
    /// Equal-frequency bucketing of the headline rate into severity groups.
    ///
    /// This is a one-dimensional rate bucketing, not a general clustering.
    /// `k` defaults to `entities / entities_per_cluster` bounded by the
    /// configured minimum and maximum. Returns an empty result below
    /// `cluster_min_entities` rows or when the headline column is missing.
    pub fn cluster_entities(&self, features: &FeatureTable, k: Option<usize>) -> ClusterResult {
        if features.len() < self.config.cluster_min_entities {
            debug!(entities = features.len(), "Too few entities for rate bucketing");
            return ClusterResult::default();
        }
        let Some(rates) = features.column(&self.config.headline_feature) else {
            debug!(feature = %self.config.headline_feature, "Headline feature missing, no buckets");
            return ClusterResult::default();
        };

        let k = k.unwrap_or_else(|| {
            (features.len() / self.config.entities_per_cluster.max(1))
                .clamp(self.config.min_clusters, self.config.max_clusters)
        });
        let edges = bucket_edges(&rates, k);

        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &rate) in rates.iter().enumerate() {
            members.entry(bucket_of(rate, &edges)).or_default().push(row);
        }

        let ids = features.index();
        let assignments = members
            .iter()
            .flat_map(|(&bucket, rows)| rows.iter().map(move |&r| (ids[r].clone(), bucket)))
            .collect();
        let profiles: Vec<ClusterProfile> = members
            .iter()
            .map(|(&bucket, rows)| {
                let bucket_rates: Vec<f64> = rows.iter().map(|&r| rates[r]).collect();
                ClusterProfile {
                    cluster_id: bucket,
                    name: BUCKET_NAMES[bucket % BUCKET_NAMES.len()].to_string(),
                    size: rows.len(),
                    avg_rate: mean(&bucket_rates),
                    drivers: rows
                        .iter()
                        .take(PROFILE_MEMBERS)
                        .map(|&r| ids[r].clone())
                        .collect(),
                }
            })
            .collect();

        ClusterResult {
            n_clusters: profiles.len(),
            n_outliers: 0,
            profiles,
            assignments,
        }
    }
}

/// Quantile edges for `k` equal-frequency buckets, duplicates removed.
/// Never asks for more buckets than there are distinct values.
fn bucket_edges(values: &[f64], k: usize) -> Vec<f64> {
    let mut distinct = values.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    let q = k.min(distinct.len()).max(1);

    let mut edges: Vec<f64> = (0..=q)
        .filter_map(|i| quantile(values, i as f64 / q as f64))
        .collect();
    edges.dedup();
    edges
}

/// Bucket of `value`: the first interval `(e[j], e[j+1]]`, lowest edge included
fn bucket_of(value: f64, edges: &[f64]) -> usize {
    if edges.len() < 2 {
        return 0;
    }
    let buckets = edges.len() - 1;
    (0..buckets)
        .find(|&j| value <= edges[j + 1])
        .unwrap_or(buckets - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rates: &[f64]) -> FeatureTable {
        let rows = rates
            .iter()
            .enumerate()
            .map(|(i, &r)| (format!("DRV{:02}", i), vec![r]))
            .collect();
        FeatureTable::from_rows(vec!["concession_rate_30d".to_string()], rows).unwrap()
    }

    #[test]
    fn test_quantile_buckets() {
        let analyzer = PatternAnalyzer::default();
        let rates: Vec<f64> = (0..20).map(|i| i as f64 / 100.0).collect();
        let result = analyzer.cluster_entities(&table(&rates), None);

        // 20 entities / 10 per bucket = 2 buckets
        assert_eq!(result.n_clusters, 2);
        assert_eq!(result.profiles[0].name, "High Performers");
        assert_eq!(result.profiles[0].size, 10);
        assert_eq!(result.profiles[1].name, "Consistent");
        assert_eq!(result.assignments["DRV00"], 0);
        assert_eq!(result.assignments["DRV19"], 1);
        assert!(result.profiles[0].avg_rate < result.profiles[1].avg_rate);
        assert_eq!(result.profiles[0].drivers.len(), 5);
    }

    #[test]
    fn test_explicit_k_and_ties() {
        let analyzer = PatternAnalyzer::default();
        let mut rates = vec![0.0; 8];
        rates.extend([0.2, 0.4, 0.6, 0.8]);
        let result = analyzer.cluster_entities(&table(&rates), Some(5));

        // repeated zeros collapse the lower edges
        assert!(result.n_clusters < 5);
        assert_eq!(result.assignments.len(), 12);
        assert_eq!(result.assignments["DRV00"], 0);
    }

    #[test]
    fn test_degenerate_inputs() {
        let analyzer = PatternAnalyzer::default();
        assert_eq!(analyzer.cluster_entities(&table(&[0.1; 5]), None), ClusterResult::default());

        let constant = analyzer.cluster_entities(&table(&[0.1; 12]), None);
        assert_eq!(constant.n_clusters, 1);

        let other = FeatureTable::from_rows(
            vec!["other".to_string()],
            (0..12).map(|i| (format!("D{}", i), vec![i as f64])).collect(),
        )
        .unwrap();
        assert_eq!(analyzer.cluster_entities(&other, None).n_clusters, 0);
    }

    #[test]
    fn test_bucket_of() {
        let edges = [0.0, 0.5, 1.0];
        assert_eq!(bucket_of(0.0, &edges), 0);
        assert_eq!(bucket_of(0.5, &edges), 0);
        assert_eq!(bucket_of(0.7, &edges), 1);
    }
}
