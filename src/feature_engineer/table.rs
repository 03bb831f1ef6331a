//! Column-named feature matrix keyed by driver id.

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Rows of numeric features, one per driver, with an ordered column list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredTable")]
pub struct FeatureTable {
    columns: Vec<String>,
    index: Vec<String>,
    rows: Vec<Vec<f64>>,
    /// Row position of each id in `index`
    #[serde(skip_serializing)]
    positions: HashMap<String, usize>,
}

/// Serialized form; positions are rebuilt and rows revalidated on load
#[derive(Deserialize)]
struct StoredTable {
    columns: Vec<String>,
    index: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl TryFrom<StoredTable> for FeatureTable {
    type Error = AnalyticsError;

    fn try_from(stored: StoredTable) -> Result<Self> {
        if stored.index.len() != stored.rows.len() {
            return Err(AnalyticsError::InvalidInput(format!(
                "{} row ids for {} rows",
                stored.index.len(),
                stored.rows.len()
            )));
        }
        Self::from_rows(stored.columns, stored.index.into_iter().zip(stored.rows).collect())
    }
}

impl FeatureTable {
    /// Empty table with the given columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            index: Vec::new(),
            rows: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build a table from `(driver_id, values)` pairs
    pub fn from_rows(columns: Vec<String>, rows: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut table = Self::new(columns);
        for (id, values) in rows {
            table.push_row(id, values)?;
        }
        Ok(table)
    }

    /// Append a row; its width must match the column count and its id must be new
    pub fn push_row(&mut self, id: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let id = id.into();
        if values.len() != self.columns.len() {
            return Err(AnalyticsError::InvalidInput(format!(
                "row '{}' has {} values for {} columns",
                id,
                values.len(),
                self.columns.len()
            )));
        }
        if self.positions.contains_key(&id) {
            return Err(AnalyticsError::InvalidInput(format!("duplicate row id '{}'", id)));
        }
        self.positions.insert(id.clone(), self.index.len());
        self.index.push(id);
        self.rows.push(values);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row ids in table order
    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of one column in row order
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    pub fn row(&self, id: &str) -> Option<&[f64]> {
        let pos = *self.positions.get(id)?;
        Some(&self.rows[pos])
    }

    pub fn row_at(&self, position: usize) -> &[f64] {
        &self.rows[position]
    }

    pub fn get(&self, id: &str, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.row(id).map(|row| row[idx])
    }

    /// Iterate `(driver_id, values)` in table order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.index
            .iter()
            .map(String::as_str)
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    /// Keep only the listed rows, in the listed order; unknown ids are skipped
    pub fn select_rows(&self, ids: &[String]) -> Self {
        let mut table = Self::new(self.columns.clone());
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(values) = self.row(id) {
                table.positions.insert(id.clone(), table.index.len());
                table.index.push(id.clone());
                table.rows.push(values.to_vec());
            }
        }
        table
    }
}
