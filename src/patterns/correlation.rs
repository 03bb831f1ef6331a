use super::types::{CorrelationAnalysis, CorrelationPair, CorrelationStrength};
use super::PatternAnalyzer;
use crate::feature_engineer::FeatureTable;
use crate::stats::pearson;

impl PatternAnalyzer {
    /// Pearson correlation matrix and the strongest feature pairs
    pub fn analyze_correlations(&self, features: &FeatureTable) -> CorrelationAnalysis {
        let columns = features.columns().to_vec();
        if columns.len() < 2 {
            return CorrelationAnalysis::default();
        }

        let values: Vec<Vec<f64>> = columns
            .iter()
            .map(|c| features.column(c).unwrap_or_default())
            .collect();

        let n = columns.len();
        let mut matrix = vec![vec![None; n]; n];
        let mut significant = Vec::new();
        for i in 0..n {
            for j in i..n {
                let r = pearson(&values[i], &values[j]);
                matrix[i][j] = r;
                matrix[j][i] = r;

                let Some(r) = r.filter(|_| i < j) else {
                    continue;
                };
                if r.abs() > self.config.correlation_threshold {
                    significant.push(CorrelationPair {
                        feature1: columns[i].clone(),
                        feature2: columns[j].clone(),
                        correlation: r,
                        strength: if r.abs() > self.config.strong_correlation {
                            CorrelationStrength::Strong
                        } else {
                            CorrelationStrength::Moderate
                        },
                    });
                }
            }
        }

        significant.sort_by(|a, b| b.correlation.abs().total_cmp(&a.correlation.abs()));
        significant.truncate(self.config.correlation_max_results);

        CorrelationAnalysis {
            columns,
            matrix,
            significant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlated_pairs() {
        let columns = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "flat".to_string(),
        ];
        let rows = (0..10)
            .map(|i| {
                let x = i as f64;
                let noise = if i % 2 == 0 { 1.0 } else { -1.0 };
                (format!("D{}", i), vec![x, -2.0 * x, x + 3.0 * noise, 1.0])
            })
            .collect();
        let table = FeatureTable::from_rows(columns, rows).unwrap();
        let analysis = PatternAnalyzer::default().analyze_correlations(&table);

        assert_eq!(analysis.significant[0].feature1, "a");
        assert_eq!(analysis.significant[0].feature2, "b");
        assert!((analysis.significant[0].correlation + 1.0).abs() < 1e-12);
        assert_eq!(analysis.significant[0].strength, CorrelationStrength::Strong);
        assert!(analysis
            .significant
            .iter()
            .all(|p| p.feature1 != "flat" && p.feature2 != "flat"));
        assert_eq!(analysis.matrix[3][0], None);
        assert!((analysis.matrix[0][0].unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_column() {
        let table = FeatureTable::from_rows(
            vec!["a".to_string()],
            vec![("D1".to_string(), vec![1.0])],
        )
        .unwrap();
        let analysis = PatternAnalyzer::default().analyze_correlations(&table);
        assert!(analysis.significant.is_empty());
    }
}
