//! Generalization lattice.
//!
//! The lattice is the product of the per-attribute level ranges
//! `[min_i, max_i]`. Nothing is enumerated at construction: nodes are
//! identified by a mixed-radix index and neighbours are computed on demand.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Stato dei nodi esplorati (arena piatta).
pub mod space;

pub use space::{Anonymity, LossRange, NodeState, Propagation, SolutionSpace};

/// Immutable vector of generalization levels, one per quasi-identifier.
///
/// `Ord` is the lexicographic order of the vector, which is the tie-break
/// used when two transformations have the same information loss.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transformation {
    levels: Box<[u32]>,
}

impl Transformation {
    /// Creates a transformation from levels.
    #[must_use]
    pub fn new(levels: impl Into<Box<[u32]>>) -> Self {
        Self {
            levels: levels.into(),
        }
    }

    /// Levels, in quasi-identifier order.
    #[must_use]
    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    /// Level of the `i`-th quasi-identifier.
    #[must_use]
    pub fn level_of(&self, i: usize) -> u32 {
        self.levels[i]
    }

    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// `true` for the zero-dimensional transformation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total generalization, `Σ levels`.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.levels.iter().sum()
    }

    /// Component-wise `self ≤ other`.
    #[must_use]
    pub fn is_generalized_by(&self, other: &Self) -> bool {
        self.levels.len() == other.levels.len()
            && self
                .levels
                .iter()
                .zip(other.levels.iter())
                .all(|(a, b)| a <= b)
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{level}")?;
        }
        write!(f, "]")
    }
}

/// Bounded product lattice of transformations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lattice {
    min: Vec<u32>,
    max: Vec<u32>,
    radix: Vec<u64>,
}

impl Lattice {
    /// Builds the lattice between `min` and `max` (inclusive, per attribute).
    ///
    /// # Errors
    ///
    /// [`ConfigError::LatticeBounds`] if the two vectors differ in length or
    /// `min[i] > max[i]` for some attribute.
    pub fn new(min: Vec<u32>, max: Vec<u32>) -> Result<Self, ConfigError> {
        if min.len() != max.len() {
            return Err(ConfigError::LatticeBounds(format!(
                "{} minimum levels for {} maximum levels",
                min.len(),
                max.len()
            )));
        }
        if let Some(i) = min.iter().zip(&max).position(|(a, b)| a > b) {
            return Err(ConfigError::LatticeBounds(format!(
                "dimension {i}: minimum {} exceeds maximum {}",
                min[i], max[i]
            )));
        }
        Ok(Self::between(min, max))
    }

    fn between(min: Vec<u32>, max: Vec<u32>) -> Self {
        let radix = min
            .iter()
            .zip(&max)
            .map(|(a, b)| u64::from(b - a) + 1)
            .collect();
        Self { min, max, radix }
    }

    /// Lattice over `[0, height_i - 1]` for every attribute.
    #[must_use]
    pub fn from_heights(heights: &[usize]) -> Self {
        let max = heights
            .iter()
            .map(|h| u32::try_from(h.saturating_sub(1)).unwrap_or(u32::MAX))
            .collect::<Vec<_>>();
        Self::between(vec![0; max.len()], max)
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    /// Least general node.
    #[must_use]
    pub fn bottom(&self) -> Transformation {
        Transformation::new(self.min.clone())
    }

    /// Most general node.
    #[must_use]
    pub fn top(&self) -> Transformation {
        Transformation::new(self.max.clone())
    }

    /// Per-attribute minimum levels.
    #[must_use]
    pub fn min_levels(&self) -> &[u32] {
        &self.min
    }

    /// Per-attribute maximum levels.
    #[must_use]
    pub fn max_levels(&self) -> &[u32] {
        &self.max
    }

    /// Level of `bottom()`.
    #[must_use]
    pub fn min_level(&self) -> u32 {
        self.min.iter().sum()
    }

    /// Level of `top()`.
    #[must_use]
    pub fn max_level(&self) -> u32 {
        self.max.iter().sum()
    }

    /// Total generalization of `t`.
    #[must_use]
    pub fn level(&self, t: &Transformation) -> u32 {
        t.total()
    }

    /// Number of nodes (saturating).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.radix
            .iter()
            .fold(1_u64, |acc, r| acc.saturating_mul(*r))
    }

    /// `true` if `bottom ≤ t ≤ top`.
    #[must_use]
    pub fn contains(&self, t: &Transformation) -> bool {
        t.len() == self.dimensions()
            && t
                .levels()
                .iter()
                .zip(self.min.iter().zip(&self.max))
                .all(|(l, (lo, hi))| lo <= l && l <= hi)
    }

    /// Mixed-radix index of `t`; the last attribute varies fastest, so the
    /// index order is the lexicographic order of the level vectors.
    /// `None` if `t` lies outside the lattice.
    #[must_use]
    pub fn index(&self, t: &Transformation) -> Option<u64> {
        if !self.contains(t) {
            return None;
        }
        Some(
            t.levels()
                .iter()
                .zip(&self.min)
                .zip(&self.radix)
                .fold(0_u64, |acc, ((l, lo), r)| {
                    acc.saturating_mul(*r).saturating_add(u64::from(l - lo))
                }),
        )
    }

    /// Inverse of [`Lattice::index`].
    #[must_use]
    pub fn transformation(&self, mut index: u64) -> Transformation {
        let mut levels = vec![0_u32; self.dimensions()];
        for i in (0..self.dimensions()).rev() {
            let digit = index % self.radix[i];
            index /= self.radix[i];
            levels[i] = self.min[i] + u32::try_from(digit).unwrap_or(0);
        }
        Transformation::new(levels)
    }

    /// Direct predecessors (one component decreased by one).
    #[must_use]
    pub fn predecessors(&self, t: &Transformation) -> Vec<Transformation> {
        let mut out = Vec::new();
        for i in 0..t.len() {
            if t.level_of(i) > self.min[i] {
                let mut levels = t.levels().to_vec();
                levels[i] -= 1;
                out.push(Transformation::new(levels));
            }
        }
        out
    }

    /// Direct successors (one component increased by one).
    #[must_use]
    pub fn successors(&self, t: &Transformation) -> Vec<Transformation> {
        let mut out = Vec::new();
        for i in 0..t.len() {
            if t.level_of(i) < self.max[i] {
                let mut levels = t.levels().to_vec();
                levels[i] += 1;
                out.push(Transformation::new(levels));
            }
        }
        out
    }

    /// All nodes with total generalization `level`, in lexicographic order.
    #[must_use]
    pub fn nodes_at_level(&self, level: u32) -> Vec<Transformation> {
        let mut out = Vec::new();
        if level < self.min_level() || level > self.max_level() {
            return out;
        }
        let mut current = Vec::with_capacity(self.dimensions());
        self.fill_level(0, level - self.min_level(), &mut current, &mut out);
        out
    }

    fn fill_level(
        &self,
        dim: usize,
        remaining: u32,
        current: &mut Vec<u32>,
        out: &mut Vec<Transformation>,
    ) {
        if dim == self.dimensions() {
            if remaining == 0 {
                out.push(Transformation::new(current.clone()));
            }
            return;
        }
        // capacità residua delle dimensioni successive
        let rest: u32 = (dim + 1..self.dimensions())
            .map(|i| self.max[i] - self.min[i])
            .sum();
        let span = self.max[dim] - self.min[dim];
        let lo = remaining.saturating_sub(rest);
        let hi = span.min(remaining);
        for offset in lo..=hi {
            current.push(self.min[dim] + offset);
            self.fill_level(dim + 1, remaining - offset, current, out);
            current.pop();
        }
    }
}
