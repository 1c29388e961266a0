//! Input side of the engine: the raw table, its attribute roles and the
//! generalization hierarchies.
//!
//! Everything here is handed over by collaborators (file readers, UIs):
//! the engine only validates it and encodes it into integer codes
//! (see [`encoding`]).

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DataError};
use crate::handle::{HandleState, SourceLifecycle};

/// Modulo con le gerarchie di generalizzazione.
pub mod hierarchy;
/// Modulo di codifica intera del dataset.
pub(crate) mod encoding;

pub use hierarchy::{Hierarchy, HierarchyBuilder};

/// Role of a column in the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Directly identifying: always removed from the output.
    Identifying,
    /// Quasi-identifying: generalized along its hierarchy.
    QuasiIdentifying,
    /// Sensitive: drives l-diversity / t-closeness, masked in outputs.
    Sensitive,
    /// Insensitive: released verbatim.
    Insensitive,
    /// Response variable of a downstream model: released verbatim.
    Response,
}

impl AttributeType {
    /// Human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identifying => "identifying",
            Self::QuasiIdentifying => "quasi-identifying",
            Self::Sensitive => "sensitive",
            Self::Insensitive => "insensitive",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AttributeSpec {
    kind: AttributeType,
    hierarchy: Option<Hierarchy>,
}

/// Attribute roles and hierarchies of a dataset.
///
/// Columns without an explicit role are [`AttributeType::Insensitive`].
/// Assigning a role twice keeps the last assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataDefinition {
    attributes: BTreeMap<String, AttributeSpec>,
}

impl DataDefinition {
    /// Empty definition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, name: &str, kind: AttributeType, hierarchy: Option<Hierarchy>) -> &mut Self {
        self.attributes
            .insert(name.to_string(), AttributeSpec { kind, hierarchy });
        self
    }

    /// Marks `name` as quasi-identifier generalized along `hierarchy`.
    pub fn set_quasi_identifier(&mut self, name: &str, hierarchy: Hierarchy) -> &mut Self {
        self.set(name, AttributeType::QuasiIdentifying, Some(hierarchy))
    }

    /// Marks `name` as sensitive.
    pub fn set_sensitive(&mut self, name: &str) -> &mut Self {
        self.set(name, AttributeType::Sensitive, None)
    }

    /// Marks `name` as sensitive with a hierarchy (needed by hierarchical t-closeness).
    pub fn set_sensitive_with_hierarchy(&mut self, name: &str, hierarchy: Hierarchy) -> &mut Self {
        self.set(name, AttributeType::Sensitive, Some(hierarchy))
    }

    /// Marks `name` as directly identifying.
    pub fn set_identifying(&mut self, name: &str) -> &mut Self {
        self.set(name, AttributeType::Identifying, None)
    }

    /// Marks `name` as insensitive.
    pub fn set_insensitive(&mut self, name: &str) -> &mut Self {
        self.set(name, AttributeType::Insensitive, None)
    }

    /// Marks `name` as response variable.
    pub fn set_response(&mut self, name: &str) -> &mut Self {
        self.set(name, AttributeType::Response, None)
    }

    /// Role of `name` (insensitive when never assigned).
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> AttributeType {
        self.attributes
            .get(name)
            .map_or(AttributeType::Insensitive, |spec| spec.kind)
    }

    /// Hierarchy bound to `name`, if any.
    #[must_use]
    pub fn hierarchy(&self, name: &str) -> Option<&Hierarchy> {
        self.attributes
            .get(name)
            .and_then(|spec| spec.hierarchy.as_ref())
    }

    /// Names with an explicit role, in lexicographic order.
    pub fn assigned(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Set of row indices forming a research subset (or a DP sample).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSubset {
    rows: BTreeSet<usize>,
}

impl DataSubset {
    /// Builds a subset from row indices.
    pub fn from_rows<I: IntoIterator<Item = usize>>(rows: I) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    /// `true` if `row` belongs to the subset.
    #[must_use]
    pub fn contains(&self, row: usize) -> bool {
        self.rows.contains(&row)
    }

    /// Number of rows in the subset.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if the subset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().copied()
    }

    /// Dense membership mask over `num_rows` rows.
    pub(crate) fn to_mask(&self, num_rows: usize) -> Result<Vec<bool>, DataError> {
        let mut mask = vec![false; num_rows];
        for row in self.iter() {
            let slot = mask.get_mut(row).ok_or(DataError::SubsetOutOfRange {
                row,
                rows: num_rows,
            })?;
            *slot = true;
        }
        Ok(mask)
    }
}

/// Source table handed to the anonymizer.
///
/// `Data` is the source of every output handle: while an output handle
/// produced from it is alive and not released, the source is locked and
/// cannot be anonymized again.
#[derive(Debug)]
pub struct Data {
    header: Vec<String>,
    rows: Arc<Vec<Vec<String>>>,
    definition: DataDefinition,
    lifecycle: Arc<Mutex<SourceLifecycle>>,
}

impl Data {
    /// Creates a table from a header and rows of strings.
    ///
    /// # Errors
    ///
    /// [`DataError::DuplicateColumn`] or [`DataError::RowWidth`].
    pub fn create<S: Into<String>>(
        header: impl IntoIterator<Item = S>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, DataError> {
        let header: Vec<String> = header.into_iter().map(Into::into).collect();

        let mut seen = HashSet::with_capacity(header.len());
        for name in &header {
            if !seen.insert(name.as_str()) {
                return Err(DataError::DuplicateColumn(name.clone()));
            }
        }

        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != header.len() {
                return Err(DataError::RowWidth {
                    row,
                    expected: header.len(),
                    found: cells.len(),
                });
            }
        }

        Ok(Self {
            header,
            rows: Arc::new(rows),
            definition: DataDefinition::new(),
            lifecycle: Arc::new(Mutex::new(SourceLifecycle::default())),
        })
    }

    /// Convenience constructor: the first row is the header.
    ///
    /// # Errors
    ///
    /// As [`Data::create`]; an empty table has no header and is
    /// [`DataError::EmptyDataset`].
    pub fn from_rows(table: &[&[&str]]) -> Result<Self, DataError> {
        let (header, body) = table.split_first().ok_or(DataError::EmptyDataset)?;
        let rows = body
            .iter()
            .map(|row| row.iter().map(|v| (*v).to_string()).collect())
            .collect();
        Self::create(header.iter().copied(), rows)
    }

    /// Column names.
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Cell value.
    #[must_use]
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
    }

    /// Index of the column called `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Attribute roles and hierarchies.
    #[must_use]
    pub fn definition(&self) -> &DataDefinition {
        &self.definition
    }

    /// Mutable access to the attribute roles.
    pub fn definition_mut(&mut self) -> &mut DataDefinition {
        &mut self.definition
    }

    /// `true` while an unreleased output handle holds this source.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lifecycle
            .lock()
            .map(|l| l.is_locked())
            .unwrap_or(true)
    }

    /// `Unforked` or `ForkedLocked`, seen from the source side.
    #[must_use]
    pub fn state(&self) -> HandleState {
        if self.is_locked() {
            HandleState::ForkedLocked
        } else {
            HandleState::Unforked
        }
    }

    pub(crate) fn rows_arc(&self) -> Arc<Vec<Vec<String>>> {
        Arc::clone(&self.rows)
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Mutex<SourceLifecycle>> {
        &self.lifecycle
    }

    /// Verifies that every attribute with a role exists in the header.
    pub(crate) fn check_definition(&self) -> Result<(), ConfigError> {
        for name in self.definition.assigned() {
            if self.column_index(name).is_none() {
                return Err(ConfigError::UnknownAttribute(name.to_string()));
            }
        }
        Ok(())
    }
}
