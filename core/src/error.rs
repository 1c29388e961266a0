//! Error taxonomy for the anonymization engine.
//!
//! Four families, each with a different propagation policy:
//!
//! - [`ConfigError`]: rejected configuration, raised before the search starts;
//! - [`DataError`]: dataset or hierarchy problems, raised at encoding time;
//! - [`HandleError`]: illegal use of an output handle (locked, orphaned, ...);
//! - [`RollbackRequired`]: a local recoding iteration could not be accepted.
//!
//! Search exhaustion (no transformation satisfies the models) is **not** an
//! error: it is reported as a result without a global optimum.

use thiserror::Error;

/// Configuration rejected before the search starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Suppression limit outside `[0, 1)`.
    #[error("suppression limit must be in [0, 1), got {0}")]
    SuppressionLimit(f64),

    /// No privacy model configured.
    #[error("at least one privacy model is required")]
    NoPrivacyModel,

    /// A privacy model parameter is trivial or out of range.
    #[error("invalid parameter for {model}: {reason}")]
    InvalidParameter {
        /// Model name.
        model: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// An attribute referenced by the configuration does not exist.
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    /// An attribute has a type incompatible with its use.
    #[error("attribute '{attribute}' must be {expected}, but is {actual}")]
    AttributeTypeConflict {
        /// Attribute name.
        attribute: String,
        /// Required type.
        expected: &'static str,
        /// Actual type.
        actual: &'static str,
    },

    /// The definition declares no quasi-identifier.
    #[error("at least one quasi-identifying attribute is required")]
    NoQuasiIdentifier,

    /// Empty, ragged or non-monotone hierarchy.
    #[error("degenerate hierarchy for '{attribute}': {reason}")]
    DegenerateHierarchy {
        /// Attribute name.
        attribute: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Two models define different research subsets.
    #[error("privacy models define conflicting research subsets")]
    ConflictingSubsets,

    /// Generalization bounds outside the hierarchy or inverted.
    #[error("invalid generalization bounds for '{attribute}': min {min}, max {max}, height {height}")]
    InvalidLevelBounds {
        /// Attribute name.
        attribute: String,
        /// Requested minimum level.
        min: u32,
        /// Requested maximum level.
        max: u32,
        /// Hierarchy height (number of levels).
        height: usize,
    },

    /// Lattice bounds of different length, or a minimum above its maximum.
    #[error("invalid lattice bounds: {0}")]
    LatticeBounds(String),

    /// Invalid metric weights.
    #[error("invalid metric weights: {0}")]
    InvalidWeights(String),

    /// Invalid heuristic or history budget.
    #[error("invalid search budget: {0}")]
    InvalidBudget(String),
}

/// Dataset or hierarchy content problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// The dataset has no rows (or no usable rows after role assignment).
    #[error("dataset has no usable rows")]
    EmptyDataset,

    /// A row has a different number of cells than the header.
    #[error("row {row} has {found} cells, expected {expected}")]
    RowWidth {
        /// Row index.
        row: usize,
        /// Expected width (header length).
        expected: usize,
        /// Actual width.
        found: usize,
    },

    /// Duplicate column name in the header.
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    /// A value in the data is not covered by the attribute's hierarchy.
    #[error("value '{value}' of attribute '{attribute}' (row {row}) is not covered by its hierarchy")]
    UnmappedValue {
        /// Attribute name.
        attribute: String,
        /// Offending value.
        value: String,
        /// Row index.
        row: usize,
    },

    /// A research subset references a row outside the dataset.
    #[error("research subset references row {row}, dataset has {rows} rows")]
    SubsetOutOfRange {
        /// Offending row index.
        row: usize,
        /// Dataset size.
        rows: usize,
    },
}

/// Illegal use of a data or output handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The source is locked by an unreleased output handle.
    #[error("source data is locked by an unreleased output handle")]
    SourceLocked,

    /// Another detached fork of this source is still alive.
    #[error("a detached fork of this source already exists")]
    ForkExists,

    /// The handle (or the result that produced it) has been released or superseded.
    #[error("handle is orphaned")]
    Orphaned,

    /// The requested transformation is not part of the solution space.
    #[error("transformation is not part of the solution space")]
    UnknownTransformation,

    /// The result has no global optimum to materialize.
    #[error("no anonymous transformation available")]
    NoSolution,

    /// Row index out of bounds.
    #[error("row {0} out of bounds")]
    RowOutOfBounds(usize),

    /// Column index out of bounds.
    #[error("column {0} out of bounds")]
    ColumnOutOfBounds(usize),
}

/// A local recoding iteration would violate the privacy models.
///
/// The handle passed to the optimizer has already been restored to the
/// state it had when `optimize()` was called.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rollback required at iteration {iteration}: {reason}")]
pub struct RollbackRequired {
    /// 1-based iteration whose result was rejected.
    pub iteration: usize,
    /// Which check failed.
    pub reason: String,
}

/// Top-level error of the engine.
#[derive(Debug, Error)]
pub enum AnonymizerError {
    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Dataset or hierarchy content problem.
    #[error(transparent)]
    Data(#[from] DataError),
    /// Illegal handle use.
    #[error(transparent)]
    Handle(#[from] HandleError),
    /// Rejected local recoding iteration.
    #[error(transparent)]
    Rollback(#[from] RollbackRequired),
}

/// Result type used across the engine.
pub type Result<T, E = AnonymizerError> = std::result::Result<T, E>;
