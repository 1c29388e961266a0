//! Information-loss metrics.
//!
//! A metric scores the equivalence classes of a transformation. Lower is
//! better. Scores are totally ordered ([`InformationLoss`] uses
//! `f64::total_cmp`) and ties between transformations are broken by the
//! lexicographic order of the level vectors, so the optimum is unique.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::encoding::DataManager;
use crate::error::ConfigError;
use crate::groupify::EquivalenceClass;
use crate::lattice::Transformation;

/// Score of a transformation; lower is better.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InformationLoss(f64);

impl InformationLoss {
    /// Wraps a raw score.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Raw score.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for InformationLoss {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InformationLoss {}

impl PartialOrd for InformationLoss {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InformationLoss {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for InformationLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// Available metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Sum of the generalization levels.
    Height,
    /// Mean of `level / max_level` over all cells.
    Precision,
    /// Mean generalization loss of all cells (share of the hierarchy
    /// leaves a generalized value covers).
    #[default]
    Loss,
    /// Discernibility: `Σ count²` plus `N` per suppressed record.
    Discernibility,
    /// Average equivalence class size.
    Aecs,
    /// Non-uniform entropy.
    NonUniformEntropy,
}

impl MetricKind {
    /// Nome del metrico.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Height => "height",
            Self::Precision => "precision",
            Self::Loss => "loss",
            Self::Discernibility => "discernibility",
            Self::Aecs => "aecs",
            Self::NonUniformEntropy => "non-uniform-entropy",
        }
    }

    const fn is_weighted(self) -> bool {
        matches!(self, Self::Precision | Self::Loss | Self::NonUniformEntropy)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metric selection plus optional per-attribute weights.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Which metric to optimize.
    pub kind: MetricKind,
    /// Weight of each quasi-identifier (missing = 1.0).
    pub weights: BTreeMap<String, f64>,
}

/// One class as seen by a metric: the levels its records are generalized
/// to and whether it is suppressed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClassCost<'a> {
    pub(crate) class: &'a EquivalenceClass,
    pub(crate) levels: &'a [u32],
    pub(crate) suppressed: bool,
}

/// Metric resolved against an encoded dataset.
#[derive(Debug, Clone)]
pub struct Metric {
    kind: MetricKind,
    weights: Vec<f64>,
    weight_sum: f64,
    max_levels: Vec<u32>,
    // somma per livello del costo di cella (Loss o entropia)
    level_sums: Vec<Vec<f64>>,
    release_size: f64,
}

impl Metric {
    pub(crate) fn new(config: &MetricConfig, manager: &DataManager) -> Result<Self, ConfigError> {
        let qis = manager.qis();

        for (name, weight) in &config.weights {
            if manager.qi_index(name).is_none() {
                return Err(ConfigError::InvalidWeights(format!(
                    "'{name}' is not a quasi-identifier"
                )));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::InvalidWeights(format!(
                    "weight of '{name}' must be finite and non-negative, got {weight}"
                )));
            }
        }

        let weights: Vec<f64> = if config.kind.is_weighted() {
            qis.iter()
                .map(|qi| config.weights.get(&qi.name).copied().unwrap_or(1.0))
                .collect()
        } else {
            vec![1.0; qis.len()]
        };
        let weight_sum: f64 = weights.iter().sum();
        if weight_sum <= 0.0 {
            return Err(ConfigError::InvalidWeights(
                "at least one weight must be positive".to_string(),
            ));
        }

        let level_sums = qis
            .iter()
            .map(|qi| {
                (0..=qi.max_level())
                    .map(|level| {
                        let released = (0..manager.num_rows()).filter(|row| manager.in_release(*row));
                        match config.kind {
                            MetricKind::NonUniformEntropy => {
                                released
                                    .map(|row| qi.generalized_log_frequency(row, level))
                                    .sum::<f64>()
                                    - qi.leaf_log_frequency_sum()
                            }
                            _ => released.map(|row| qi.generalization_loss(row, level)).sum(),
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            kind: config.kind,
            weights,
            weight_sum,
            max_levels: qis.iter().map(|qi| qi.max_level()).collect(),
            level_sums,
            release_size: manager.release_size() as f64,
        })
    }

    /// Selected metric.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }

    /// `true` if generalizing further can never decrease the score.
    ///
    /// With suppression a coarser transformation may suppress fewer
    /// records, so only `Height` stays monotonic.
    #[must_use]
    pub const fn is_monotonic(&self, suppression: bool) -> bool {
        matches!(self.kind, MetricKind::Height) || !suppression
    }

    /// Score that no output of `t` can beat, when it can be derived from the
    /// transformation alone.
    #[must_use]
    pub fn lower_bound(&self, t: &Transformation) -> Option<InformationLoss> {
        let levels = t.levels();
        let value = match self.kind {
            MetricKind::Height => f64::from(t.total()),
            MetricKind::Precision => self.precision_of(levels) / self.weight_sum,
            MetricKind::Loss => {
                self.weighted_level_sum(levels) / (self.weight_sum * self.release_size)
            }
            MetricKind::NonUniformEntropy => self.weighted_level_sum(levels),
            MetricKind::Discernibility | MetricKind::Aecs => return None,
        };
        Some(InformationLoss::new(value))
    }

    fn weighted_level_sum(&self, levels: &[u32]) -> f64 {
        self.level_sums
            .iter()
            .zip(levels)
            .zip(&self.weights)
            .map(|((sums, level), w)| w * sums[*level as usize])
            .sum()
    }

    fn precision_of(&self, levels: &[u32]) -> f64 {
        levels
            .iter()
            .zip(&self.max_levels)
            .zip(&self.weights)
            .map(|((level, max), w)| {
                if *max == 0 {
                    0.0
                } else {
                    w * f64::from(*level) / f64::from(*max)
                }
            })
            .sum()
    }

    /// Scores a grouping where each class may carry its own levels.
    pub(crate) fn evaluate(&self, manager: &DataManager, classes: &[ClassCost<'_>]) -> InformationLoss {
        let n = self.release_size;
        let released = classes.iter().filter(|c| c.class.count > 0);

        let value = match self.kind {
            MetricKind::Height => {
                let total: f64 = released
                    .map(|c| f64::from(c.class.count) * f64::from(c.levels.iter().sum::<u32>()))
                    .sum();
                total / n
            }
            MetricKind::Precision => {
                let total: f64 = released
                    .map(|c| {
                        let cost = if c.suppressed {
                            self.weight_sum
                        } else {
                            self.precision_of(c.levels)
                        };
                        f64::from(c.class.count) * cost
                    })
                    .sum();
                total / (n * self.weight_sum)
            }
            MetricKind::Loss => {
                let total: f64 = released
                    .map(|c| f64::from(c.class.count) * self.class_loss(manager, c))
                    .sum();
                total / (n * self.weight_sum)
            }
            MetricKind::Discernibility => released
                .map(|c| {
                    let count = f64::from(c.class.count);
                    if c.suppressed {
                        count * n
                    } else {
                        count * count
                    }
                })
                .sum(),
            MetricKind::Aecs => {
                let mut groups = 0_usize;
                let mut any_suppressed = false;
                for c in released {
                    if c.suppressed {
                        any_suppressed = true;
                    } else {
                        groups += 1;
                    }
                }
                let groups = groups + usize::from(any_suppressed);
                if groups == 0 {
                    n
                } else {
                    n / groups as f64
                }
            }
            MetricKind::NonUniformEntropy => {
                // Σ count·log2 f(g) - Σ log2 f(x); a suppressed cell counts as g = *
                let log_n = n.log2();
                let generalized: f64 = released
                    .map(|c| {
                        let row = c.class.representative;
                        let per_record: f64 = manager
                            .qis()
                            .iter()
                            .zip(c.levels)
                            .zip(&self.weights)
                            .map(|((qi, level), w)| {
                                if c.suppressed {
                                    w * log_n
                                } else {
                                    w * qi.generalized_log_frequency(row, *level)
                                }
                            })
                            .sum();
                        f64::from(c.class.count) * per_record
                    })
                    .sum();
                let raw: f64 = manager
                    .qis()
                    .iter()
                    .zip(&self.weights)
                    .map(|(qi, w)| w * qi.leaf_log_frequency_sum())
                    .sum();
                generalized - raw
            }
        };
        InformationLoss::new(value)
    }

    fn class_loss(&self, manager: &DataManager, c: &ClassCost<'_>) -> f64 {
        if c.suppressed {
            return self.weight_sum;
        }
        manager
            .qis()
            .iter()
            .zip(c.levels)
            .zip(&self.weights)
            .map(|((qi, level), w)| w * qi.generalization_loss(c.class.representative, *level))
            .sum()
    }
}

/// Unweighted mean generalization loss of the cells of one class.
pub(crate) fn class_generalization_loss(
    manager: &DataManager,
    class: &EquivalenceClass,
    levels: &[u32],
) -> f64 {
    let qis = manager.qis();
    if qis.is_empty() {
        return 0.0;
    }
    let total: f64 = qis
        .iter()
        .zip(levels)
        .map(|(qi, level)| qi.generalization_loss(class.representative, *level))
        .sum();
    total / qis.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groupify::tests::example_data;
    use crate::groupify::{Groupify, Requirements};

    fn score(kind: MetricKind, levels: &[u32]) -> f64 {
        let manager = DataManager::new(&example_data(), None).expect("manager");
        let metric = Metric::new(
            &MetricConfig {
                kind,
                ..MetricConfig::default()
            },
            &manager,
        )
        .expect("metric");
        let t = Transformation::new(levels.to_vec());
        let g = Groupify::build(&manager, &t, &Requirements::default());
        let classes: Vec<_> = g
            .classes()
            .iter()
            .map(|class| ClassCost {
                class,
                levels: t.levels(),
                suppressed: false,
            })
            .collect();
        let value = metric.evaluate(&manager, &classes).value();
        if let Some(bound) = metric.lower_bound(&t) {
            assert!((bound.value() - value).abs() < 1e-9, "{kind}: bound equals unsuppressed score");
        }
        value
    }

    #[test]
    fn loss_of_example_optimum() {
        // age: 1/3 per cell, gender: 1, zipcode: 1/3 per cell
        let v = score(MetricKind::Loss, &[1, 1, 2]);
        assert!((v - (1.0 / 3.0 + 1.0 + 1.0 / 3.0) / 3.0).abs() < 1e-9);
        assert!(score(MetricKind::Loss, &[0, 0, 0]).abs() < 1e-12);
    }

    #[test]
    fn height_and_precision() {
        assert!((score(MetricKind::Height, &[1, 1, 2]) - 4.0).abs() < 1e-12);
        let p = score(MetricKind::Precision, &[1, 1, 2]);
        assert!((p - (0.5 + 1.0 + 0.4) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn discernibility_and_aecs() {
        assert!((score(MetricKind::Discernibility, &[1, 1, 2]) - 17.0).abs() < 1e-12);
        assert!((score(MetricKind::Aecs, &[1, 1, 2]) - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_is_zero_without_generalization() {
        assert!(score(MetricKind::NonUniformEntropy, &[0, 0, 0]).abs() < 1e-9);
        assert!(score(MetricKind::NonUniformEntropy, &[2, 1, 5]) > 0.0);
    }

    #[test]
    fn information_loss_total_order() {
        let a = InformationLoss::new(0.1);
        let b = InformationLoss::new(0.2);
        assert!(a < b);
        assert_eq!(a.max(b), b);
        assert_eq!(InformationLoss::new(f64::NAN), InformationLoss::new(f64::NAN));
    }

    #[test]
    fn unknown_weight_is_rejected() {
        let manager = DataManager::new(&example_data(), None).expect("manager");
        let mut config = MetricConfig::default();
        config.weights.insert("salary".into(), 2.0);
        assert!(matches!(
            Metric::new(&config, &manager),
            Err(ConfigError::InvalidWeights(_))
        ));
    }
}
