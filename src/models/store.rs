//! Versioned model artifacts on disk.
//!
//! Each version is one JSON file `risk_model_v{version}.json` holding the
//! booster, scaler, feature names, explainer settings and training metadata.

use crate::error::{AnalyticsError, Result};
use crate::models::risk_scorer::TrainedModel;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PREFIX: &str = "risk_model_v";
const SUFFIX: &str = ".json";

/// Directory of saved model versions
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Artifact path for `version`; versions that could leave the directory are rejected
    pub fn path_for(&self, version: &str) -> Result<PathBuf> {
        if version.is_empty()
            || version.contains("..")
            || version.contains(|c: char| c == '/' || c == '\\' || c.is_control())
        {
            return Err(AnalyticsError::InvalidInput(format!(
                "invalid model version '{}'",
                version
            )));
        }
        Ok(self.dir.join(format!("{}{}{}", PREFIX, version, SUFFIX)))
    }

    /// Write `model`, stamped with `version` if given; returns the file path
    pub fn save(&self, model: &TrainedModel, version: Option<&str>) -> Result<PathBuf> {
        let mut model = model.clone();
        if let Some(version) = version {
            model.version = version.to_string();
        }
        let path = self.path_for(&model.version)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_json::to_vec_pretty(&model)?)?;

        info!(version = %model.version, path = %path.display(), "Model saved");
        Ok(path)
    }

    /// Saved versions, oldest first
    pub fn versions(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            AnalyticsError::Persistence(format!("cannot read {}: {}", self.dir.display(), e))
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(version) = name
                .strip_prefix(PREFIX)
                .and_then(|rest| rest.strip_suffix(SUFFIX))
            {
                versions.push(version.to_string());
            }
        }
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }

    /// Load `version`, or the latest saved version when None
    pub fn load(&self, version: Option<&str>) -> Result<TrainedModel> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self.versions()?.pop().ok_or_else(|| {
                AnalyticsError::Persistence(format!(
                    "no model files found in {}",
                    self.dir.display()
                ))
            })?,
        };

        let path = self.path_for(&version)?;
        let bytes = fs::read(&path).map_err(|e| {
            AnalyticsError::Persistence(format!("cannot read {}: {}", path.display(), e))
        })?;
        let model: TrainedModel = serde_json::from_slice(&bytes)?;

        if model.version != version {
            warn!(
                file_version = %version,
                stored_version = %model.version,
                "Artifact name and stored version differ"
            );
        }
        if model.scaler.width() != model.feature_names.len()
            || model.booster.n_features() != model.feature_names.len()
        {
            return Err(AnalyticsError::Persistence(format!(
                "artifact {} is inconsistent: {} feature names",
                path.display(),
                model.feature_names.len()
            )));
        }

        Ok(model)
    }
}

/// One dot-separated part of a version; numbers sort before text
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Component<'a> {
    Number(u64),
    Text(&'a str),
}

fn components(version: &str) -> Vec<Component<'_>> {
    version
        .split('.')
        .map(|part| part.parse().map_or(Component::Text(part), Component::Number))
        .collect()
}

/// Component-wise comparison ("1.10.0" > "1.9.2"); equal parts fall back to the raw text
fn compare_versions(a: &str, b: &str) -> Ordering {
    components(a)
        .cmp(&components(b))
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert_eq!(compare_versions("1.10.0", "1.9.2"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("2", "10"), Ordering::Less);
    }

    #[test]
    fn test_mixed_version_ordering_is_consistent() {
        assert_eq!(compare_versions("10", "1a"), Ordering::Less);
        assert_eq!(compare_versions("2", "1a"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "1.0-rc"), Ordering::Less);
        assert_eq!(compare_versions("01", "1"), Ordering::Less);

        let mut versions = vec!["1a", "10", "2", "1.9", "1.10", "beta"];
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(versions, vec!["1.9", "1.10", "2", "10", "1a", "beta"]);
    }

    #[test]
    fn test_version_cannot_escape_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("models"));
        for version in ["../x", "a/b", "a\\b", "..", ""] {
            assert!(
                matches!(store.path_for(version), Err(AnalyticsError::InvalidInput(_))),
                "{:?} accepted",
                version
            );
            assert!(matches!(store.load(Some(version)), Err(AnalyticsError::InvalidInput(_))));
        }
        assert!(store.path_for("2.1.0").unwrap().starts_with(dir.path().join("models")));
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(store.versions().unwrap().is_empty());
        assert!(matches!(store.load(None), Err(AnalyticsError::Persistence(_))));
    }

    #[test]
    fn test_versions_listing_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["risk_model_v1.2.0.json", "risk_model_v1.10.0.json", "notes.txt"] {
            fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let store = ModelStore::new(dir.path());
        assert_eq!(store.versions().unwrap(), vec!["1.2.0", "1.10.0"]);
    }
}
