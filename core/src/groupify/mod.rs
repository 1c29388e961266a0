//! Equivalence-class construction.
//!
//! Classes are built by hashing the generalized key of every record
//! ([`Groupify::build`]) or, much cheaper, by coarsening the classes of a
//! more specific transformation ([`Groupify::coarsen`]): every class of a
//! predecessor is contained in exactly one class of the successor, so merging
//! the predecessor's classes by their representative is exact.

use std::collections::HashMap;

use crate::data::encoding::DataManager;
use crate::lattice::Transformation;

/// Istogrammi dei valori sensibili.
pub mod distribution;
/// Cache degli snapshot (storia).
pub mod history;

pub use distribution::Distribution;
pub use history::{HistoryCache, HistoryConfig};

/// Statistics the active privacy models need per class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Requirements {
    /// Sensitive attributes (by index) whose histograms are required.
    pub distributions: Vec<usize>,
}

impl Requirements {
    /// Adds a sensitive attribute, keeping the list unique and sorted.
    pub fn require_distribution(&mut self, sensitive: usize) {
        if let Err(pos) = self.distributions.binary_search(&sensitive) {
            self.distributions.insert(pos, sensitive);
        }
    }

    /// Position of `sensitive` inside [`EquivalenceClass::distributions`].
    #[must_use]
    pub fn slot(&self, sensitive: usize) -> Option<usize> {
        self.distributions.binary_search(&sensitive).ok()
    }
}

/// Records sharing the same generalized quasi-identifier tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClass {
    /// Generalized key (one code per quasi-identifier).
    pub key: Box<[u32]>,
    /// First row of the class, in row order.
    pub representative: usize,
    /// Rows of the release population.
    pub count: u32,
    /// All rows, released or not.
    pub population_count: u32,
    /// Histograms, aligned with [`Requirements::distributions`].
    pub distributions: Vec<Distribution>,
}

impl EquivalenceClass {
    fn absorb(&mut self, other: &Self) {
        self.count = self.count.saturating_add(other.count);
        self.population_count = self.population_count.saturating_add(other.population_count);
        self.representative = self.representative.min(other.representative);
        for (mine, theirs) in self.distributions.iter_mut().zip(&other.distributions) {
            mine.merge(theirs);
        }
    }
}

/// Equivalence classes of one transformation.
#[derive(Debug, Clone)]
pub struct Groupify {
    transformation: Transformation,
    classes: Vec<EquivalenceClass>,
}

impl Groupify {
    /// Full scan of the dataset.
    pub(crate) fn build(
        manager: &DataManager,
        transformation: &Transformation,
        requirements: &Requirements,
    ) -> Self {
        let levels = transformation.levels();
        let (classes, _) = group_rows(manager, requirements, |row, key| {
            for (qi, level) in manager.qis().iter().zip(levels) {
                key.push(qi.code(row, *level));
            }
        });
        Self {
            transformation: transformation.clone(),
            classes,
        }
    }

    /// Coarsens the classes of a predecessor `snapshot` into the classes of
    /// `transformation`. `snapshot.transformation() ≤ transformation` must hold.
    pub(crate) fn coarsen(
        manager: &DataManager,
        snapshot: &Self,
        transformation: &Transformation,
    ) -> Self {
        let levels = transformation.levels();
        let mut index: HashMap<Box<[u32]>, usize> = HashMap::with_capacity(snapshot.classes.len());
        let mut classes: Vec<EquivalenceClass> = Vec::new();
        for class in &snapshot.classes {
            let key: Box<[u32]> = manager
                .qis()
                .iter()
                .zip(levels)
                .map(|(qi, level)| qi.code(class.representative, *level))
                .collect();
            if let Some(&pos) = index.get(&key) {
                classes[pos].absorb(class);
            } else {
                index.insert(key.clone(), classes.len());
                let mut merged = class.clone();
                merged.key = key;
                classes.push(merged);
            }
        }
        Self {
            transformation: transformation.clone(),
            classes,
        }
    }

    /// Full scan with per-row levels, returning the class of every row.
    ///
    /// Used to materialize outputs where records may be recoded
    /// individually.
    pub(crate) fn build_with_members(
        manager: &DataManager,
        row_levels: &[Transformation],
        requirements: &Requirements,
    ) -> (Self, Vec<usize>) {
        let (classes, members) = group_rows(manager, requirements, |row, key| {
            for (qi, level) in manager.qis().iter().zip(row_levels[row].levels()) {
                key.push(qi.code(row, *level));
            }
        });
        let transformation = row_levels
            .first()
            .cloned()
            .unwrap_or_else(|| Transformation::new(Vec::new()));
        (
            Self {
                transformation,
                classes,
            },
            members,
        )
    }

    /// Transformation the classes were built for.
    #[must_use]
    pub const fn transformation(&self) -> &Transformation {
        &self.transformation
    }

    /// Classes in first-occurrence order.
    #[must_use]
    pub fn classes(&self) -> &[EquivalenceClass] {
        &self.classes
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// `true` if there are no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

fn group_rows<F>(
    manager: &DataManager,
    requirements: &Requirements,
    mut key_of: F,
) -> (Vec<EquivalenceClass>, Vec<usize>)
where
    F: FnMut(usize, &mut Vec<u32>),
{
    let mut index: HashMap<Box<[u32]>, usize> = HashMap::new();
    let mut classes: Vec<EquivalenceClass> = Vec::new();
    let mut members = Vec::with_capacity(manager.num_rows());
    let mut key = Vec::with_capacity(manager.qis().len());

    for row in 0..manager.num_rows() {
        key.clear();
        key_of(row, &mut key);

        let pos = if let Some(&pos) = index.get(key.as_slice()) {
            pos
        } else {
            let boxed: Box<[u32]> = key.clone().into_boxed_slice();
            index.insert(boxed.clone(), classes.len());
            classes.push(EquivalenceClass {
                key: boxed,
                representative: row,
                count: 0,
                population_count: 0,
                distributions: vec![Distribution::new(); requirements.distributions.len()],
            });
            classes.len() - 1
        };

        let class = &mut classes[pos];
        class.population_count = class.population_count.saturating_add(1);
        if manager.in_release(row) {
            class.count = class.count.saturating_add(1);
            for (slot, sensitive) in requirements.distributions.iter().enumerate() {
                class.distributions[slot].add(manager.sensitive()[*sensitive].code(row));
            }
        }
        members.push(pos);
    }

    (classes, members)
}
