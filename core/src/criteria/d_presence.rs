use crate::criteria::{check_range, ClassContext, PrivacyCriterion};
use crate::error::ConfigError;
use crate::groupify::EquivalenceClass;

/// δ-presence: the probability that a record of the population is part of
/// the research subset, given its class, lies in `[d_min, d_max]`.
///
/// The subset itself is the release population, so `count` is the number
/// of subset records of a class and `population_count` its size over the
/// whole dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DPresence {
    d_min: f64,
    d_max: f64,
}

impl DPresence {
    /// `0 ≤ d_min ≤ d_max ≤ 1`, `d_max > 0`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] outside these bounds.
    pub fn new(d_min: f64, d_max: f64) -> Result<Self, ConfigError> {
        check_range("d-presence", "d_min", d_min, |v| (0.0..=1.0).contains(&v), "in [0, 1]")?;
        check_range("d-presence", "d_max", d_max, |v| v > 0.0 && v <= 1.0, "in (0, 1]")?;
        if d_min > d_max {
            return Err(ConfigError::InvalidParameter {
                model: "d-presence",
                reason: format!("d_min ({d_min}) exceeds d_max ({d_max})"),
            });
        }
        Ok(Self { d_min, d_max })
    }
}

impl PrivacyCriterion for DPresence {
    fn name(&self) -> &'static str {
        "d-presence"
    }

    fn is_monotonic(&self, _suppression: bool) -> bool {
        false
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, _ctx: &ClassContext<'_>) -> bool {
        if class.population_count == 0 {
            return true;
        }
        let delta = f64::from(class.count) / f64::from(class.population_count);
        self.d_min <= delta && delta <= self.d_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encoding::DataManager;
    use crate::data::DataSubset;
    use crate::groupify::tests::example_data;
    use crate::groupify::{Groupify, Requirements};
    use crate::lattice::Transformation;

    #[test]
    fn bounds_are_validated() {
        assert!(DPresence::new(0.6, 0.5).is_err());
        assert!(DPresence::new(0.0, 0.0).is_err());
        assert!(DPresence::new(-0.1, 0.5).is_err());
        assert!(DPresence::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn ratio_of_subset_rows_per_class() {
        let subset = DataSubset::from_rows([0, 2, 3]);
        let manager = DataManager::new(&example_data(), Some(&subset)).expect("manager");
        let t = Transformation::new(vec![1, 1, 3]);
        let g = Groupify::build(&manager, &t, &Requirements::default());
        let requirements = Requirements::default();
        let ctx = ClassContext {
            manager: &manager,
            requirements: &requirements,
            levels: t.levels(),
        };
        // <50: 1 of 4 subset rows; >=50: 2 of 3
        let model = DPresence::new(0.2, 0.7).expect("model");
        assert!(g.classes().iter().all(|c| model.is_class_anonymous(c, &ctx)));
        let strict = DPresence::new(0.3, 0.7).expect("model");
        assert!(!g.classes().iter().all(|c| strict.is_class_anonymous(c, &ctx)));
    }
}
