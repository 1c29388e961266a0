//! Output handles and the lifecycle of their source.
//!
//! Stati espliciti:
//!
//! ```text
//!   Unforked --output()--> ForkedLocked --fork()--> ForkedUnlocked (copia)
//!                               |                        |
//!                           release()                release()
//!                               v                        v
//!                           Orphaned                 Orphaned
//! ```
//!
//! The locking handle keeps the source from being anonymized again until it
//! is released; releasing it bumps the source epoch, which invalidates the
//! history cache and every result computed before. At most one detached fork
//! per source is alive at any time. Dropping a handle releases it.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::criteria::{ModelEvaluation, ModelSet};
use crate::data::encoding::DataManager;
use crate::data::AttributeType;
use crate::error::HandleError;
use crate::groupify::Groupify;
use crate::lattice::Transformation;
use crate::metric::{ClassCost, InformationLoss, Metric};

/// Placeholder of suppressed and removed cells.
pub const SUPPRESSED: &str = "*";

/// State of a source or of an output handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Source without a live locking handle.
    Unforked,
    /// Handle that locks its source.
    ForkedLocked,
    /// Detached copy; does not lock the source.
    ForkedUnlocked,
    /// Released; every operation fails.
    Orphaned,
}

impl HandleState {
    /// Etichetta testuale.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unforked => "unforked",
            Self::ForkedLocked => "forked-locked",
            Self::ForkedUnlocked => "forked-unlocked",
            Self::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lock and epoch of a source, shared by the source and its handles.
#[derive(Debug, Default)]
pub(crate) struct SourceLifecycle {
    locked_by: Option<u64>,
    detached: Option<u64>,
    epoch: u64,
    next_id: u64,
}

impl SourceLifecycle {
    pub(crate) const fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    /// Locks the source for a new handle.
    pub(crate) fn lock(&mut self) -> Result<u64, HandleError> {
        if self.is_locked() {
            return Err(HandleError::SourceLocked);
        }
        let id = self.next_id();
        self.locked_by = Some(id);
        Ok(id)
    }
}

pub(crate) fn lock_lifecycle(
    lifecycle: &Mutex<SourceLifecycle>,
) -> Result<MutexGuard<'_, SourceLifecycle>, HandleError> {
    // un lock avvelenato lascia lo stato indeterminato: la sorgente è persa
    lifecycle.lock().map_err(|_| HandleError::Orphaned)
}

/// Per-record recoding state: the levels of every row and whether the row
/// is suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordState {
    pub(crate) levels: Vec<Transformation>,
    pub(crate) suppressed: Vec<bool>,
}

/// Grouping of a record state and the verdict of the models on it.
#[derive(Debug)]
pub(crate) struct Assessment {
    pub(crate) groupify: Groupify,
    pub(crate) members: Vec<usize>,
    pub(crate) evaluation: ModelEvaluation,
}

impl Assessment {
    /// Evaluates every model over the whole release, each record at its own
    /// levels.
    pub(crate) fn of(manager: &DataManager, models: &ModelSet, levels: &[Transformation]) -> Self {
        let (groupify, members) =
            Groupify::build_with_members(manager, levels, models.requirements());
        let classes = groupify.classes();
        let evaluation = models.evaluate(manager, classes, |i| {
            levels[classes[i].representative].levels()
        });
        Self {
            groupify,
            members,
            evaluation,
        }
    }

    /// Suppression flag of every row.
    pub(crate) fn suppressed_rows(&self) -> Vec<bool> {
        self.members
            .iter()
            .map(|class| self.evaluation.suppressed[*class])
            .collect()
    }

    pub(crate) fn loss(
        &self,
        manager: &DataManager,
        metric: &Metric,
        levels: &[Transformation],
    ) -> InformationLoss {
        let costs: Vec<ClassCost<'_>> = self
            .groupify
            .classes()
            .iter()
            .zip(&self.evaluation.suppressed)
            .map(|(class, suppressed)| ClassCost {
                class,
                levels: levels[class.representative].levels(),
                suppressed: *suppressed,
            })
            .collect();
        metric.evaluate(manager, &costs)
    }
}

/// Materialized output of one transformation.
///
/// Cells are rendered on access:
/// - identifying and sensitive columns, and suppressed quasi-identifiers,
///   show `*`;
/// - quasi-identifiers show the generalized value at the record's levels;
/// - insensitive and response columns are released as is;
/// - rows outside the release population are fully masked.
#[derive(Debug)]
pub struct OutputHandle {
    id: u64,
    state: HandleState,
    lifecycle: Arc<Mutex<SourceLifecycle>>,
    manager: Arc<DataManager>,
    transformation: Transformation,
    qi_of_column: Vec<Option<usize>>,
    pub(crate) records: RecordState,
    order: Vec<usize>,
}

impl OutputHandle {
    /// Locking handle for `transformation`, with the suppression decided by
    /// `models`.
    pub(crate) fn materialize(
        lifecycle: &Arc<Mutex<SourceLifecycle>>,
        manager: Arc<DataManager>,
        models: &ModelSet,
        transformation: &Transformation,
    ) -> Result<Self, HandleError> {
        let levels = vec![transformation.clone(); manager.num_rows()];
        let assessment = Assessment::of(&manager, models, &levels);
        let suppressed = assessment.suppressed_rows();

        let id = lock_lifecycle(lifecycle)?.lock()?;
        let qi_of_column = (0..manager.header().len())
            .map(|column| manager.qis().iter().position(|qi| qi.column == column))
            .collect();
        let order = (0..manager.num_rows()).collect();

        tracing::debug!(
            transformation = %transformation,
            outliers = assessment.evaluation.outliers,
            "output materialized"
        );
        Ok(Self {
            id,
            state: HandleState::ForkedLocked,
            lifecycle: Arc::clone(lifecycle),
            manager,
            transformation: transformation.clone(),
            qi_of_column,
            records: RecordState { levels, suppressed },
            order,
        })
    }

    fn ensure_live(&self) -> Result<(), HandleError> {
        if self.state == HandleState::Orphaned {
            Err(HandleError::Orphaned)
        } else {
            Ok(())
        }
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> HandleState {
        self.state
    }

    /// Column names.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release.
    pub fn header(&self) -> Result<&[String], HandleError> {
        self.ensure_live()?;
        Ok(self.manager.header())
    }

    /// Number of rows (all rows of the source, masked or not).
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release.
    pub fn num_rows(&self) -> Result<usize, HandleError> {
        self.ensure_live()?;
        Ok(self.order.len())
    }

    /// Transformation the output was materialized for.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release.
    pub fn transformation(&self) -> Result<&Transformation, HandleError> {
        self.ensure_live()?;
        Ok(&self.transformation)
    }

    fn source_row(&self, row: usize) -> Result<usize, HandleError> {
        self.ensure_live()?;
        self.order
            .get(row)
            .copied()
            .ok_or(HandleError::RowOutOfBounds(row))
    }

    fn render(&self, source: usize, column: usize) -> &str {
        if !self.manager.in_release(source) {
            return SUPPRESSED;
        }
        match self.manager.kind(column) {
            // i valori sensibili guidano i modelli ma non escono dal rilascio
            AttributeType::Identifying | AttributeType::Sensitive => SUPPRESSED,
            AttributeType::QuasiIdentifying => {
                if self.records.suppressed[source] {
                    return SUPPRESSED;
                }
                match self.qi_of_column[column] {
                    Some(index) => {
                        let qi = &self.manager.qis()[index];
                        let level = self.records.levels[source].level_of(index);
                        qi.value(qi.code(source, level))
                    }
                    None => SUPPRESSED,
                }
            }
            AttributeType::Insensitive | AttributeType::Response => {
                self.manager.raw_value(source, column)
            }
        }
    }

    /// Rendered cell.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release, or an out-of-bounds error
    /// for `row` or `column`.
    pub fn value(&self, row: usize, column: usize) -> Result<&str, HandleError> {
        let source = self.source_row(row)?;
        if column >= self.qi_of_column.len() {
            return Err(HandleError::ColumnOutOfBounds(column));
        }
        Ok(self.render(source, column))
    }

    /// Rendered row.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release, or
    /// [`HandleError::RowOutOfBounds`].
    pub fn row(&self, row: usize) -> Result<Vec<&str>, HandleError> {
        let source = self.source_row(row)?;
        Ok((0..self.qi_of_column.len())
            .map(|column| self.render(source, column))
            .collect())
    }

    /// `true` if the quasi-identifiers of `row` are suppressed.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release, or
    /// [`HandleError::RowOutOfBounds`].
    pub fn is_outlier(&self, row: usize) -> Result<bool, HandleError> {
        let source = self.source_row(row)?;
        Ok(self.manager.in_release(source) && self.records.suppressed[source])
    }

    /// Suppressed records of the release population.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release.
    pub fn suppressed_count(&self) -> Result<usize, HandleError> {
        self.ensure_live()?;
        Ok(self.outliers())
    }

    pub(crate) fn outliers(&self) -> usize {
        (0..self.records.suppressed.len())
            .filter(|row| self.manager.in_release(*row) && self.records.suppressed[*row])
            .count()
    }

    /// Stable sort of the rows by the rendered values of `columns`; rows
    /// that compare equal keep their source order.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release, or
    /// [`HandleError::ColumnOutOfBounds`].
    pub fn sort(&mut self, columns: &[usize], ascending: bool) -> Result<(), HandleError> {
        self.ensure_live()?;
        if let Some(column) = columns.iter().find(|c| **c >= self.qi_of_column.len()) {
            return Err(HandleError::ColumnOutOfBounds(*column));
        }
        let mut order = self.order.clone();
        order.sort_by(|a, b| {
            let by_values = columns
                .iter()
                .map(|c| self.render(*a, *c).cmp(self.render(*b, *c)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            let by_values = if ascending {
                by_values
            } else {
                by_values.reverse()
            };
            by_values.then_with(|| a.cmp(b))
        });
        self.order = order;
        Ok(())
    }

    /// Detached copy that does not lock the source.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] after release, or [`HandleError::ForkExists`]
    /// while another fork of the same source is alive.
    pub fn fork(&self) -> Result<Self, HandleError> {
        self.ensure_live()?;
        let id = {
            let mut lifecycle = lock_lifecycle(&self.lifecycle)?;
            if lifecycle.detached.is_some() {
                return Err(HandleError::ForkExists);
            }
            let id = lifecycle.next_id();
            lifecycle.detached = Some(id);
            id
        };
        Ok(Self {
            id,
            state: HandleState::ForkedUnlocked,
            lifecycle: Arc::clone(&self.lifecycle),
            manager: Arc::clone(&self.manager),
            transformation: self.transformation.clone(),
            qi_of_column: self.qi_of_column.clone(),
            records: self.records.clone(),
            order: self.order.clone(),
        })
    }

    /// Orphans the handle. Releasing the locking handle unlocks the source
    /// and starts a new epoch.
    ///
    /// # Errors
    ///
    /// [`HandleError::Orphaned`] if the handle was already released.
    pub fn release(&mut self) -> Result<(), HandleError> {
        self.ensure_live()?;
        let previous = self.state;
        self.state = HandleState::Orphaned;
        let mut lifecycle = lock_lifecycle(&self.lifecycle)?;
        match previous {
            HandleState::ForkedLocked if lifecycle.locked_by == Some(self.id) => {
                lifecycle.locked_by = None;
                lifecycle.epoch = lifecycle.epoch.wrapping_add(1);
                tracing::debug!(epoch = lifecycle.epoch, "source released");
            }
            HandleState::ForkedUnlocked if lifecycle.detached == Some(self.id) => {
                lifecycle.detached = None;
            }
            _ => {}
        }
        Ok(())
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        if self.state != HandleState::Orphaned {
            // già orfano o lock avvelenato: niente da fare
            let _ = self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::PrivacyModel;
    use crate::groupify::tests::example_data;

    fn handle(levels: &[u32], lifecycle: &Arc<Mutex<SourceLifecycle>>) -> Result<OutputHandle, HandleError> {
        let data = example_data();
        let manager = Arc::new(DataManager::new(&data, None).expect("manager"));
        let models = ModelSet::resolve(&[PrivacyModel::KAnonymity { k: 2 }], &manager, 0.5)
            .expect("models");
        OutputHandle::materialize(
            lifecycle,
            manager,
            &models,
            &Transformation::new(levels.to_vec()),
        )
    }

    #[test]
    fn renders_generalized_and_suppressed_cells() {
        let lifecycle = Arc::new(Mutex::new(SourceLifecycle::default()));
        let output = handle(&[1, 1, 1], &lifecycle).expect("handle");
        // three singleton classes at [1,1,1]: rows 0, 1, 2
        assert_eq!(output.suppressed_count(), Ok(3));
        assert_eq!(output.row(0).expect("row"), vec!["*", "*", "*"]);
        assert_eq!(output.row(4).expect("row"), vec!["<50", "*", "8193*"]);
        assert!(output.is_outlier(1).expect("row"));
        assert_eq!(output.value(9, 0), Err(HandleError::RowOutOfBounds(9)));
        assert_eq!(output.value(0, 3), Err(HandleError::ColumnOutOfBounds(3)));
    }

    #[test]
    fn sort_is_stable_and_directional() {
        let lifecycle = Arc::new(Mutex::new(SourceLifecycle::default()));
        let mut output = handle(&[1, 1, 2], &lifecycle).expect("handle");
        output.sort(&[0], true).expect("sort");
        assert_eq!(output.value(0, 0), Ok("<50"));
        assert_eq!(output.value(6, 0), Ok(">=50"));
        output.sort(&[0], false).expect("sort");
        assert_eq!(output.value(0, 0), Ok(">=50"));
    }

    #[test]
    fn lifecycle_transitions() {
        let lifecycle = Arc::new(Mutex::new(SourceLifecycle::default()));
        let mut locked = handle(&[1, 1, 2], &lifecycle).expect("handle");
        assert_eq!(locked.state(), HandleState::ForkedLocked);
        assert_eq!(
            handle(&[1, 1, 2], &lifecycle).map(|_| ()),
            Err(HandleError::SourceLocked)
        );

        let mut fork = locked.fork().expect("fork");
        assert_eq!(fork.state(), HandleState::ForkedUnlocked);
        assert_eq!(locked.fork().map(|_| ()), Err(HandleError::ForkExists));
        fork.release().expect("release fork");
        assert!(locked.fork().is_ok());

        locked.release().expect("release");
        assert_eq!(locked.state(), HandleState::Orphaned);
        assert_eq!(locked.header().map(|_| ()), Err(HandleError::Orphaned));
        assert_eq!(locked.release(), Err(HandleError::Orphaned));
        let guard = lifecycle.lock().expect("lifecycle");
        assert!(!guard.is_locked());
        assert_eq!(guard.epoch(), 1);
    }
}
