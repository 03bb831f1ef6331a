//! Error types for the analytics engine.
//!
//! Only validation failures are errors. Statistical "not enough data"
//! conditions are signalled through empty or neutral results instead.

use thiserror::Error;

/// Errors raised by the analytics components.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// A required input column is missing.
    #[error("Missing required column '{column}' ({context})")]
    Schema { column: String, context: String },

    /// Prediction, importance or persistence was requested before training.
    #[error("Model not trained. Call train() first.")]
    ModelNotTrained,

    /// Training labels contain a single class.
    #[error("Training labels must contain both classes (got {positives} positive, {negatives} negative)")]
    LabelDiversity { positives: usize, negatives: usize },

    /// Prediction input columns differ from the trained feature names.
    #[error("Feature schema mismatch: expected {expected:?}, got {actual:?}")]
    FeatureSchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// Caller supplied structurally invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing a model artifact failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalyticsError {
    pub fn schema(column: &str, context: impl Into<String>) -> Self {
        Self::Schema {
            column: column.to_string(),
            context: context.into(),
        }
    }
}

impl From<std::io::Error> for AnalyticsError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalyticsError::schema("driver_id", "row 3");
        assert!(err.to_string().contains("driver_id"));
        assert!(err.to_string().contains("row 3"));

        let err = AnalyticsError::LabelDiversity {
            positives: 0,
            negatives: 12,
        };
        assert!(err.to_string().contains("12 negative"));

        let err = AnalyticsError::FeatureSchemaMismatch {
            expected: vec!["a".to_string()],
            actual: vec!["b".to_string()],
        };
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_io_error_maps_to_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err: AnalyticsError = io.into();
        assert!(matches!(err, AnalyticsError::Persistence(_)));
    }
}
