//! Privacy models.
//!
//! Models are configured as [`PrivacyModel`] values (attribute names,
//! raw parameters) and resolved against the encoded dataset into
//! [`Criterion`] values, which implement [`PrivacyCriterion`]. A
//! [`ModelSet`] is the conjunction of all criteria plus the suppression
//! limit.
//!
//! Class-based criteria decide per equivalence class; failing classes are
//! suppressed. Sample-based criteria decide on the classes that survive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::encoding::DataManager;
use crate::data::DataSubset;
use crate::error::ConfigError;
use crate::groupify::{Distribution, EquivalenceClass, Requirements};

/// k-anonimità.
pub mod k_anonymity;
/// l-diversità (distinta, entropica, ricorsiva).
pub mod l_diversity;
/// t-closeness (distanza uniforme e gerarchica).
pub mod t_closeness;
/// δ-presenza.
pub mod d_presence;
/// (ε,δ)-privacy differenziale tramite campionamento (SafePub).
pub mod differential_privacy;
/// Modello costi/benefici dell'attaccante.
pub mod profitability;
/// Rischio medio di re-identificazione.
pub mod risk;

pub use d_presence::DPresence;
pub use differential_privacy::{DpGeneralization, EdDifferentialPrivacy};
pub use k_anonymity::KAnonymity;
pub use l_diversity::{DistinctLDiversity, EntropyEstimator, EntropyLDiversity, RecursiveClDiversity};
pub use profitability::{AttackMode, AttackerModel, CostBenefitConfig, Profitability};
pub use risk::AverageReidentificationRisk;
pub use t_closeness::{EqualDistanceTCloseness, HierarchicalDistanceTCloseness};

/// Configured privacy model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrivacyModel {
    /// Every class has at least `k` records.
    KAnonymity {
        /// Minimum class size.
        k: u32,
    },
    /// Every class has at least `l` distinct sensitive values.
    DistinctLDiversity {
        /// Sensitive attribute.
        attribute: String,
        /// Minimum number of distinct values.
        l: u32,
    },
    /// The entropy of every class is at least `ln l`.
    EntropyLDiversity {
        /// Sensitive attribute.
        attribute: String,
        /// Diversity parameter.
        l: f64,
        /// Entropy estimator.
        #[serde(default)]
        estimator: EntropyEstimator,
    },
    /// The most frequent value is less than `c` times the tail frequency.
    RecursiveClDiversity {
        /// Sensitive attribute.
        attribute: String,
        /// Ratio bound.
        c: f64,
        /// Diversity parameter.
        l: u32,
    },
    /// Total variation distance to the global distribution is at most `t`.
    EqualDistanceTCloseness {
        /// Sensitive attribute.
        attribute: String,
        /// Distance threshold.
        t: f64,
    },
    /// Hierarchical earth mover's distance is at most `t`.
    HierarchicalDistanceTCloseness {
        /// Sensitive attribute (needs a hierarchy).
        attribute: String,
        /// Distance threshold.
        t: f64,
    },
    /// Share of subset records in every class is within `[d_min, d_max]`.
    DPresence {
        /// Lower bound.
        d_min: f64,
        /// Upper bound.
        d_max: f64,
        /// Research subset.
        subset: DataSubset,
    },
    /// (ε,δ)-differential privacy by random sampling and k-anonymization.
    EdDifferentialPrivacy {
        /// Privacy budget.
        epsilon: f64,
        /// Failure probability.
        delta: f64,
        /// Data-independent generalization scheme.
        generalization: DpGeneralization,
        /// Seed of the sampling step.
        #[serde(default)]
        seed: u64,
    },
    /// Game-theoretic model: classes are released only when profitable.
    Profitability {
        /// Attacker knowledge.
        attacker: AttackerModel,
        /// Whether the publisher assumes an attack.
        attack: AttackMode,
        /// Costs and benefits.
        cost_benefit: CostBenefitConfig,
        /// Research subset (required for the journalist model).
        #[serde(default)]
        subset: Option<DataSubset>,
    },
    /// `#classes / #records` among released records is at most `threshold`.
    AverageReidentificationRisk {
        /// Risk threshold.
        threshold: f64,
    },
}

impl PrivacyModel {
    /// Research subset defined by this model, if any. DP models sample
    /// their subset deterministically from the seed.
    pub(crate) fn subset(&self, num_rows: usize) -> Option<DataSubset> {
        match self {
            Self::DPresence { subset, .. } => Some(subset.clone()),
            Self::Profitability { subset, .. } => subset.clone(),
            Self::EdDifferentialPrivacy {
                epsilon, seed, ..
            } => Some(differential_privacy::sample(
                num_rows,
                differential_privacy::sampling_probability(*epsilon),
                *seed,
            )),
            _ => None,
        }
    }
}

/// Release population shared by all models; conflicting subsets are rejected.
pub(crate) fn release_subset(
    models: &[PrivacyModel],
    num_rows: usize,
) -> Result<Option<DataSubset>, ConfigError> {
    let mut found: Option<DataSubset> = None;
    for model in models {
        if let Some(subset) = model.subset(num_rows) {
            match &found {
                Some(existing) if *existing != subset => {
                    return Err(ConfigError::ConflictingSubsets);
                }
                Some(_) => {}
                None => found = Some(subset),
            }
        }
    }
    Ok(found)
}

/// Per-class evaluation context.
#[derive(Debug, Clone, Copy)]
pub struct ClassContext<'a> {
    pub(crate) manager: &'a DataManager,
    pub(crate) requirements: &'a Requirements,
    pub(crate) levels: &'a [u32],
}

impl ClassContext<'_> {
    /// Histogram of sensitive attribute `sensitive` inside `class`.
    #[must_use]
    pub fn distribution<'c>(
        &self,
        class: &'c EquivalenceClass,
        sensitive: usize,
    ) -> Option<&'c Distribution> {
        self.requirements
            .slot(sensitive)
            .and_then(|slot| class.distributions.get(slot))
    }
}

/// Aggregate of the classes that survive suppression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSummary {
    /// Released (non-suppressed) classes.
    pub classes: u64,
    /// Released records.
    pub records: u64,
}

/// Capabilities shared by every privacy model.
pub trait PrivacyCriterion {
    /// Short name used in logs and verdicts.
    fn name(&self) -> &'static str;

    /// `true` if anonymity is preserved by further generalization, given
    /// whether suppression is enabled.
    fn is_monotonic(&self, suppression: bool) -> bool;

    /// Declares the class statistics the model reads.
    fn requirements(&self, _requirements: &mut Requirements) {}

    /// Class-level decision. Failing classes are suppressed.
    fn is_class_anonymous(&self, _class: &EquivalenceClass, _ctx: &ClassContext<'_>) -> bool {
        true
    }

    /// Decision on the released sample as a whole.
    fn is_sample_anonymous(&self, _summary: &SampleSummary) -> bool {
        true
    }
}

/// Resolved privacy model.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// k-anonymity.
    KAnonymity(KAnonymity),
    /// Distinct l-diversity.
    DistinctLDiversity(DistinctLDiversity),
    /// Entropy l-diversity.
    EntropyLDiversity(EntropyLDiversity),
    /// Recursive (c,l)-diversity.
    RecursiveClDiversity(RecursiveClDiversity),
    /// Equal-distance t-closeness.
    EqualDistanceTCloseness(EqualDistanceTCloseness),
    /// Hierarchical-distance t-closeness.
    HierarchicalDistanceTCloseness(HierarchicalDistanceTCloseness),
    /// d-presence.
    DPresence(DPresence),
    /// (ε,δ)-differential privacy.
    EdDifferentialPrivacy(EdDifferentialPrivacy),
    /// Profitability.
    Profitability(Profitability),
    /// Average re-identification risk.
    AverageReidentificationRisk(AverageReidentificationRisk),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Criterion::KAnonymity($inner) => $body,
            Criterion::DistinctLDiversity($inner) => $body,
            Criterion::EntropyLDiversity($inner) => $body,
            Criterion::RecursiveClDiversity($inner) => $body,
            Criterion::EqualDistanceTCloseness($inner) => $body,
            Criterion::HierarchicalDistanceTCloseness($inner) => $body,
            Criterion::DPresence($inner) => $body,
            Criterion::EdDifferentialPrivacy($inner) => $body,
            Criterion::Profitability($inner) => $body,
            Criterion::AverageReidentificationRisk($inner) => $body,
        }
    };
}

impl PrivacyCriterion for Criterion {
    fn name(&self) -> &'static str {
        dispatch!(self, c => c.name())
    }

    fn is_monotonic(&self, suppression: bool) -> bool {
        dispatch!(self, c => c.is_monotonic(suppression))
    }

    fn requirements(&self, requirements: &mut Requirements) {
        dispatch!(self, c => c.requirements(requirements));
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        dispatch!(self, c => c.is_class_anonymous(class, ctx))
    }

    fn is_sample_anonymous(&self, summary: &SampleSummary) -> bool {
        dispatch!(self, c => c.is_sample_anonymous(summary))
    }
}

/// Outcome of one model on one transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelVerdict {
    /// Model name.
    pub model: &'static str,
    /// `true` if the model holds after suppression.
    pub satisfied: bool,
    /// Classes this model forced into suppression.
    pub failing_classes: usize,
}

/// Outcome of the whole model set on one grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEvaluation {
    /// Every model holds and the suppression limit is respected.
    pub anonymous: bool,
    /// Suppressed records of the release population.
    pub outliers: u64,
    /// Per-class suppression flags.
    pub suppressed: Vec<bool>,
    /// Per-model details.
    pub per_model: Vec<ModelVerdict>,
}

/// Conjunction of resolved criteria.
#[derive(Debug, Clone)]
pub struct ModelSet {
    criteria: Vec<Criterion>,
    requirements: Requirements,
    max_outliers: u64,
    suppression: bool,
    fixed_levels: Option<Vec<u32>>,
}

impl ModelSet {
    /// Validates and resolves `models` against the encoded dataset.
    pub(crate) fn resolve(
        models: &[PrivacyModel],
        manager: &DataManager,
        suppression_limit: f64,
    ) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::NoPrivacyModel);
        }

        let mut criteria = Vec::with_capacity(models.len());
        let mut fixed_levels: Option<Vec<u32>> = None;
        for model in models {
            let criterion = match model {
                PrivacyModel::KAnonymity { k } => {
                    Criterion::KAnonymity(KAnonymity::new(*k, manager.release_size())?)
                }
                PrivacyModel::DistinctLDiversity { attribute, l } => Criterion::DistinctLDiversity(
                    DistinctLDiversity::new(sensitive(manager, attribute)?, *l)?,
                ),
                PrivacyModel::EntropyLDiversity {
                    attribute,
                    l,
                    estimator,
                } => Criterion::EntropyLDiversity(EntropyLDiversity::new(
                    sensitive(manager, attribute)?,
                    *l,
                    *estimator,
                )?),
                PrivacyModel::RecursiveClDiversity { attribute, c, l } => {
                    Criterion::RecursiveClDiversity(RecursiveClDiversity::new(
                        sensitive(manager, attribute)?,
                        *c,
                        *l,
                    )?)
                }
                PrivacyModel::EqualDistanceTCloseness { attribute, t } => {
                    Criterion::EqualDistanceTCloseness(EqualDistanceTCloseness::new(
                        manager,
                        sensitive(manager, attribute)?,
                        *t,
                    )?)
                }
                PrivacyModel::HierarchicalDistanceTCloseness { attribute, t } => {
                    Criterion::HierarchicalDistanceTCloseness(HierarchicalDistanceTCloseness::new(
                        manager,
                        sensitive(manager, attribute)?,
                        *t,
                    )?)
                }
                PrivacyModel::DPresence { d_min, d_max, .. } => {
                    Criterion::DPresence(DPresence::new(*d_min, *d_max)?)
                }
                PrivacyModel::EdDifferentialPrivacy {
                    epsilon,
                    delta,
                    generalization,
                    ..
                } => {
                    let dp = EdDifferentialPrivacy::new(*epsilon, *delta, generalization, manager)?;
                    let levels = dp.levels().to_vec();
                    match &fixed_levels {
                        Some(existing) if *existing != levels => {
                            return Err(ConfigError::InvalidParameter {
                                model: "ed-differential-privacy",
                                reason: "two differential privacy models fix different generalizations"
                                    .to_string(),
                            });
                        }
                        _ => fixed_levels = Some(levels),
                    }
                    Criterion::EdDifferentialPrivacy(dp)
                }
                PrivacyModel::Profitability {
                    attacker,
                    attack,
                    cost_benefit,
                    subset,
                } => Criterion::Profitability(Profitability::new(
                    *attacker,
                    *attack,
                    cost_benefit.clone(),
                    subset.is_some(),
                )?),
                PrivacyModel::AverageReidentificationRisk { threshold } => {
                    Criterion::AverageReidentificationRisk(AverageReidentificationRisk::new(
                        *threshold,
                    )?)
                }
            };
            criteria.push(criterion);
        }

        let mut requirements = Requirements::default();
        for criterion in &criteria {
            criterion.requirements(&mut requirements);
        }

        // floor(limit · N): the limit is a fraction of the release population
        let max_outliers = (suppression_limit * manager.release_size() as f64).floor() as u64;

        Ok(Self {
            criteria,
            requirements,
            max_outliers,
            suppression: suppression_limit > 0.0,
            fixed_levels,
        })
    }

    /// Resolved criteria, in configuration order.
    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Statistics required by the criteria.
    #[must_use]
    pub const fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Maximum number of suppressed records.
    #[must_use]
    pub const fn max_outliers(&self) -> u64 {
        self.max_outliers
    }

    /// `true` if the suppression limit is positive.
    #[must_use]
    pub const fn suppression(&self) -> bool {
        self.suppression
    }

    /// Levels fixed by a differential privacy model.
    #[must_use]
    pub fn fixed_levels(&self) -> Option<&[u32]> {
        self.fixed_levels.as_deref()
    }

    /// Conjunction of per-model monotonicity.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.criteria
            .iter()
            .all(|c| c.is_monotonic(self.suppression))
    }

    /// Names of the criteria, for logging.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.criteria.iter().map(PrivacyCriterion::name).collect()
    }

    /// Evaluates every criterion on `classes`, each generalized to the
    /// levels returned by `levels_of(class_index)`.
    pub(crate) fn evaluate<'l, F>(
        &self,
        manager: &DataManager,
        classes: &[EquivalenceClass],
        levels_of: F,
    ) -> ModelEvaluation
    where
        F: Fn(usize) -> &'l [u32],
    {
        let mut failing = vec![0_usize; self.criteria.len()];
        let mut suppressed = vec![false; classes.len()];
        let mut outliers = 0_u64;
        let mut summary = SampleSummary::default();

        for (index, class) in classes.iter().enumerate() {
            // classi senza record rilasciati: nulla da pubblicare
            if class.count == 0 {
                continue;
            }
            let ctx = ClassContext {
                manager,
                requirements: &self.requirements,
                levels: levels_of(index),
            };
            let mut ok = true;
            for (slot, criterion) in self.criteria.iter().enumerate() {
                if !criterion.is_class_anonymous(class, &ctx) {
                    failing[slot] += 1;
                    ok = false;
                }
            }
            if ok {
                summary.classes += 1;
                summary.records += u64::from(class.count);
            } else {
                suppressed[index] = true;
                outliers += u64::from(class.count);
            }
        }

        let within_limit = outliers <= self.max_outliers;
        let mut anonymous = within_limit && summary.records > 0;

        let per_model = self
            .criteria
            .iter()
            .zip(&failing)
            .map(|(criterion, failing)| {
                let sample_ok = criterion.is_sample_anonymous(&summary);
                anonymous &= sample_ok;
                ModelVerdict {
                    model: criterion.name(),
                    satisfied: sample_ok && within_limit && summary.records > 0,
                    failing_classes: *failing,
                }
            })
            .collect();

        ModelEvaluation {
            anonymous,
            outliers,
            suppressed,
            per_model,
        }
    }
}

/// Looks up a sensitive attribute by name, distinguishing unknown names
/// from attributes with another role.
fn sensitive(manager: &DataManager, attribute: &str) -> Result<usize, ConfigError> {
    if let Some(index) = manager.sensitive_index(attribute) {
        return Ok(index);
    }
    match manager.header().iter().position(|h| h == attribute) {
        Some(column) => Err(ConfigError::AttributeTypeConflict {
            attribute: attribute.to_string(),
            expected: "sensitive",
            actual: manager.kind(column).as_str(),
        }),
        None => Err(ConfigError::UnknownAttribute(attribute.to_string())),
    }
}

/// Helper shared by the models: rejects non-finite or out-of-range values.
pub(crate) fn check_range(
    model: &'static str,
    name: &str,
    value: f64,
    valid: impl FnOnce(f64) -> bool,
    expectation: &str,
) -> Result<(), ConfigError> {
    if value.is_finite() && valid(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            model,
            reason: format!("{name} must be {expectation}, got {value}"),
        })
    }
}

/// Per-model parameters keyed by attribute, for the DP level map.
pub(crate) type LevelMap = BTreeMap<String, u32>;
