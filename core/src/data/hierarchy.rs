//! Generalization hierarchies.
//!
//! A hierarchy is a table with one row per leaf value: the first column is
//! the raw value (level 0), every further column the value at the next
//! generalization level. The engine never parses hierarchy files; callers
//! hand over the table already loaded.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Generalization hierarchy of one attribute.
///
/// Row `i` is `[leaf, level_1, ..., level_H]`. All rows have the same width,
/// which is the number of levels ([`Hierarchy::height`]).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    rows: Vec<Vec<String>>,
}

impl Hierarchy {
    /// Creates a hierarchy from owned rows. Validation happens when the
    /// hierarchy is bound to an attribute (see [`Hierarchy::validate`]).
    #[must_use]
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Convenience constructor from string slices.
    #[must_use]
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|row| row.iter().map(|v| (*v).to_string()).collect())
                .collect(),
        )
    }

    /// Starts an incremental builder.
    #[must_use]
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::default()
    }

    /// Number of generalization levels, including level 0.
    ///
    /// `0` only for an empty hierarchy, which never validates.
    #[must_use]
    pub fn height(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Highest generalization level (`height - 1`).
    #[must_use]
    pub fn max_level(&self) -> u32 {
        u32::try_from(self.height().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Raw rows of the table.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of leaves (rows).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.rows.len()
    }

    /// Generalized value of `value` at `level`, if `value` is a leaf.
    #[must_use]
    pub fn generalize(&self, value: &str, level: usize) -> Option<&str> {
        self.rows
            .iter()
            .find(|row| row[0] == value)
            .and_then(|row| row.get(level))
            .map(String::as_str)
    }

    /// Checks the structural invariants of the hierarchy.
    ///
    /// - at least one row and one column;
    /// - all rows have the same width;
    /// - leaves are unique;
    /// - the value at level `L + 1` is a function of the value at level `L`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DegenerateHierarchy`] describing the first violation.
    pub fn validate(&self, attribute: &str) -> Result<(), ConfigError> {
        let degenerate = |reason: String| ConfigError::DegenerateHierarchy {
            attribute: attribute.to_string(),
            reason,
        };

        let width = self.height();
        if self.rows.is_empty() || width == 0 {
            return Err(degenerate("hierarchy is empty".to_string()));
        }

        let mut leaves = HashSet::with_capacity(self.rows.len());
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(degenerate(format!(
                    "row {index} has {} levels, expected {width}",
                    row.len()
                )));
            }
            if !leaves.insert(row[0].as_str()) {
                return Err(degenerate(format!("duplicate leaf '{}'", row[0])));
            }
        }

        for level in 0..width.saturating_sub(1) {
            let mut parent: HashMap<&str, &str> = HashMap::new();
            for row in &self.rows {
                let child = row[level].as_str();
                let next = row[level + 1].as_str();
                match parent.get(child) {
                    Some(existing) if *existing != next => {
                        return Err(degenerate(format!(
                            "value '{child}' at level {level} generalizes to both '{existing}' and '{next}'"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        parent.insert(child, next);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Incremental builder for [`Hierarchy`].
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    rows: Vec<Vec<String>>,
}

impl HierarchyBuilder {
    /// Appends one row `[leaf, level_1, ...]`.
    #[must_use]
    pub fn add(mut self, row: &[&str]) -> Self {
        self.rows
            .push(row.iter().map(|v| (*v).to_string()).collect());
        self
    }

    /// Finishes the hierarchy.
    #[must_use]
    pub fn build(self) -> Hierarchy {
        Hierarchy::new(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zipcode() -> Hierarchy {
        Hierarchy::builder()
            .add(&["81667", "8166*", "816**", "81***", "8****", "*****"])
            .add(&["81675", "8167*", "816**", "81***", "8****", "*****"])
            .add(&["81925", "8192*", "819**", "81***", "8****", "*****"])
            .add(&["81931", "8193*", "819**", "81***", "8****", "*****"])
            .build()
    }

    #[test]
    fn height_and_generalize() {
        let h = zipcode();
        assert_eq!(h.height(), 6);
        assert_eq!(h.max_level(), 5);
        assert_eq!(h.generalize("81925", 2), Some("819**"));
        assert_eq!(h.generalize("99999", 2), None);
        assert!(h.validate("zipcode").is_ok());
    }

    #[test]
    fn single_level_hierarchy_is_legal() {
        let h = Hierarchy::from_rows(&[&["a"], &["b"]]);
        assert_eq!(h.max_level(), 0);
        assert!(h.validate("x").is_ok());
    }

    #[test]
    fn empty_hierarchy_is_rejected() {
        let err = Hierarchy::default().validate("x").unwrap_err();
        assert!(matches!(err, ConfigError::DegenerateHierarchy { .. }));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let h = Hierarchy::from_rows(&[&["a", "*"], &["b"]]);
        assert!(h.validate("x").is_err());
    }

    #[test]
    fn duplicate_leaves_are_rejected() {
        let h = Hierarchy::from_rows(&[&["a", "*"], &["a", "*"]]);
        assert!(h.validate("x").is_err());
    }

    #[test]
    fn diverging_generalization_is_rejected() {
        // "ab" reconverges inconsistently: level 1 "x" maps to two parents.
        let h = Hierarchy::from_rows(&[&["a", "x", "p"], &["b", "x", "q"]]);
        let err = h.validate("x").unwrap_err();
        assert!(err.to_string().contains("generalizes to both"));
    }
}
