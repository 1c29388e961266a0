//! Game-theoretic protection: a class is released only if publishing it is
//! profitable for the data publisher, given an attacker who weighs gain
//! against cost.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::criteria::{check_range, ClassContext, PrivacyCriterion};
use crate::error::ConfigError;
use crate::groupify::EquivalenceClass;
use crate::metric::class_generalization_loss;

/// What the attacker knows about the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackerModel {
    /// Knows the target is in the release: success probability `1 / count`.
    Prosecutor,
    /// Only knows the population: success probability `1 / population_count`.
    Journalist,
}

/// Whether the publisher assumes the attacker acts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    /// The attacker attacks whenever it pays off; the publisher absorbs the loss.
    Attack,
    /// Classes are released only if no attack pays off.
    NoAttack,
}

impl fmt::Display for AttackerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prosecutor => write!(f, "prosecutor"),
            Self::Journalist => write!(f, "journalist"),
        }
    }
}

/// Monetary parameters, per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBenefitConfig {
    /// Benefit of publishing one record without information loss.
    pub publisher_benefit: f64,
    /// Loss of the publisher when a record is re-identified.
    pub publisher_loss: f64,
    /// Gain of the attacker on success.
    pub adversary_gain: f64,
    /// Cost of one attack.
    pub adversary_cost: f64,
}

impl Default for CostBenefitConfig {
    fn default() -> Self {
        Self {
            publisher_benefit: 1_200.0,
            publisher_loss: 300.0,
            adversary_gain: 300.0,
            adversary_cost: 4.0,
        }
    }
}

/// Resolved profitability model.
#[derive(Debug, Clone, PartialEq)]
pub struct Profitability {
    attacker: AttackerModel,
    attack: AttackMode,
    config: CostBenefitConfig,
}

impl Profitability {
    /// The journalist model needs a research subset; amounts must be
    /// non-negative and the publisher benefit positive.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] for any violated condition.
    pub fn new(
        attacker: AttackerModel,
        attack: AttackMode,
        config: CostBenefitConfig,
        has_subset: bool,
    ) -> Result<Self, ConfigError> {
        const MODEL: &str = "profitability";
        if attacker == AttackerModel::Journalist && !has_subset {
            return Err(ConfigError::InvalidParameter {
                model: MODEL,
                reason: "the journalist attacker model requires a research subset".to_string(),
            });
        }
        check_range(MODEL, "publisher_benefit", config.publisher_benefit, |v| v > 0.0, "positive")?;
        for (name, value) in [
            ("publisher_loss", config.publisher_loss),
            ("adversary_gain", config.adversary_gain),
            ("adversary_cost", config.adversary_cost),
        ] {
            check_range(MODEL, name, value, |v| v >= 0.0, "non-negative")?;
        }
        Ok(Self {
            attacker,
            attack,
            config,
        })
    }

    fn success_probability(&self, class: &EquivalenceClass) -> f64 {
        let size = match self.attacker {
            AttackerModel::Prosecutor => class.count,
            AttackerModel::Journalist => class.population_count,
        };
        if size == 0 {
            0.0
        } else {
            1.0 / f64::from(size)
        }
    }

    /// Decides a class given its information loss.
    #[must_use]
    pub fn is_profitable(&self, class: &EquivalenceClass, information_loss: f64) -> bool {
        let p = self.success_probability(class);
        let adversary_payout = self.config.adversary_gain * p - self.config.adversary_cost;
        let benefit = self.config.publisher_benefit * (1.0 - information_loss);
        match self.attack {
            AttackMode::Attack => {
                let expected_loss = if adversary_payout > 0.0 {
                    self.config.publisher_loss * p
                } else {
                    0.0
                };
                benefit - expected_loss > 0.0
            }
            AttackMode::NoAttack => adversary_payout <= 0.0 && benefit > 0.0,
        }
    }
}

impl PrivacyCriterion for Profitability {
    fn name(&self) -> &'static str {
        match self.attacker {
            AttackerModel::Prosecutor => "profitability-prosecutor",
            AttackerModel::Journalist => "profitability-journalist",
        }
    }

    fn is_monotonic(&self, _suppression: bool) -> bool {
        false
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        let loss = class_generalization_loss(ctx.manager, class, ctx.levels);
        self.is_profitable(class, loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(count: u32, population_count: u32) -> EquivalenceClass {
        EquivalenceClass {
            key: vec![0_u32].into_boxed_slice(),
            representative: 0,
            count,
            population_count,
            distributions: Vec::new(),
        }
    }

    #[test]
    fn no_attack_requires_unprofitable_adversary() {
        let model = Profitability::new(
            AttackerModel::Prosecutor,
            AttackMode::NoAttack,
            CostBenefitConfig::default(),
            false,
        )
        .expect("model");
        // 300 / 50 - 4 = 2 > 0: the attacker would attack
        assert!(!model.is_profitable(&class(50, 50), 0.1));
        // 300 / 100 - 4 = -1
        assert!(model.is_profitable(&class(100, 100), 0.1));
        // total information loss leaves no benefit
        assert!(!model.is_profitable(&class(100, 100), 1.0));
    }

    #[test]
    fn attack_mode_weighs_expected_loss() {
        let config = CostBenefitConfig {
            publisher_benefit: 10.0,
            publisher_loss: 100.0,
            adversary_gain: 100.0,
            adversary_cost: 1.0,
        };
        let model =
            Profitability::new(AttackerModel::Prosecutor, AttackMode::Attack, config, false)
                .expect("model");
        // payout 100/2 - 1 > 0, publisher: 10·0.5 - 100/2 < 0
        assert!(!model.is_profitable(&class(2, 2), 0.5));
        // payout 100/20 - 1 > 0, publisher: 10·0.9 - 100/20 = 4 > 0
        assert!(model.is_profitable(&class(20, 20), 0.1));
    }

    #[test]
    fn journalist_uses_population_and_needs_subset() {
        assert!(Profitability::new(
            AttackerModel::Journalist,
            AttackMode::NoAttack,
            CostBenefitConfig::default(),
            false,
        )
        .is_err());
        let model = Profitability::new(
            AttackerModel::Journalist,
            AttackMode::NoAttack,
            CostBenefitConfig::default(),
            true,
        )
        .expect("model");
        // 2 released records, but 100 in the population
        assert!(model.is_profitable(&class(2, 100), 0.0));
    }
}
