//! t-closeness.
//!
//! The distribution of the sensitive attribute in every class must be close
//! to its distribution over the whole release population. Two ground
//! distances are supported: equal distance (total variation) and the
//! hierarchical earth mover's distance over the attribute's hierarchy.

use crate::criteria::{check_range, ClassContext, PrivacyCriterion};
use crate::data::encoding::DataManager;
use crate::error::ConfigError;
use crate::groupify::{Distribution, EquivalenceClass, Requirements};

fn global_distribution(manager: &DataManager, sensitive: usize) -> Vec<f64> {
    let mut q = vec![0.0; manager.sensitive()[sensitive].distinct_values()];
    let total = manager.release_size() as f64;
    for (code, frequency) in manager.release_distribution(sensitive) {
        q[code as usize] = f64::from(frequency) / total;
    }
    q
}

fn check_t(model: &'static str, t: f64) -> Result<(), ConfigError> {
    check_range(model, "t", t, |t| t > 0.0 && t <= 1.0, "in (0, 1]")
}

/// `½ Σ |pᵢ − qᵢ| ≤ t`.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualDistanceTCloseness {
    sensitive: usize,
    t: f64,
    global: Vec<f64>,
}

impl EqualDistanceTCloseness {
    pub(crate) fn new(manager: &DataManager, sensitive: usize, t: f64) -> Result<Self, ConfigError> {
        check_t("equal-distance-t-closeness", t)?;
        Ok(Self {
            sensitive,
            t,
            global: global_distribution(manager, sensitive),
        })
    }

    /// Total variation distance between `distribution` and the release.
    #[must_use]
    pub fn distance(&self, distribution: &Distribution) -> f64 {
        let total = distribution.total() as f64;
        if total == 0.0 {
            return 1.0;
        }
        let mut covered = 0.0;
        let mut sum = 0.0;
        for (code, frequency) in distribution.entries() {
            let q = self.global.get(*code as usize).copied().unwrap_or(0.0);
            covered += q;
            sum += (f64::from(*frequency) / total - q).abs();
        }
        // valori assenti dalla classe: |0 - q| = q
        sum += (1.0 - covered).max(0.0);
        sum / 2.0
    }
}

impl PrivacyCriterion for EqualDistanceTCloseness {
    fn name(&self) -> &'static str {
        "equal-distance-t-closeness"
    }

    fn is_monotonic(&self, suppression: bool) -> bool {
        !suppression
    }

    fn requirements(&self, requirements: &mut Requirements) {
        requirements.require_distribution(self.sensitive);
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        ctx.distribution(class, self.sensitive)
            .is_some_and(|d| self.distance(d) <= self.t)
    }
}

/// Hierarchical earth mover's distance `≤ t`.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchicalDistanceTCloseness {
    sensitive: usize,
    t: f64,
    global: Vec<f64>,
    leaf_node: Vec<u32>,
    // parent_of[l][nodo al livello l-1] = nodo al livello l
    parent_of: Vec<Vec<u32>>,
    nodes_per_level: Vec<usize>,
}

impl HierarchicalDistanceTCloseness {
    pub(crate) fn new(manager: &DataManager, sensitive: usize, t: f64) -> Result<Self, ConfigError> {
        check_t("hierarchical-distance-t-closeness", t)?;
        let attribute = &manager.sensitive()[sensitive];
        let tree = attribute
            .tree
            .as_ref()
            .filter(|tree| tree.height() > 0)
            .ok_or_else(|| ConfigError::DegenerateHierarchy {
                attribute: attribute.name.clone(),
                reason: "hierarchical t-closeness needs a hierarchy with at least two levels"
                    .to_string(),
            })?;

        let height = tree.height();
        let mut parent_of = vec![Vec::new(); height + 1];
        for level in 1..=height {
            let mut parents = vec![0_u32; tree.nodes_per_level[level - 1]];
            for code in 0..attribute.distinct_values() {
                let child = tree.node_at[level - 1][code] as usize;
                parents[child] = tree.node_at[level][code];
            }
            parent_of[level] = parents;
        }

        Ok(Self {
            sensitive,
            t,
            global: global_distribution(manager, sensitive),
            leaf_node: tree.node_at[0].clone(),
            parent_of,
            nodes_per_level: tree.nodes_per_level.clone(),
        })
    }

    /// Hierarchical EMD between `distribution` and the release:
    /// `Σ_nodes level/H · min(pos, neg)`, accumulated bottom-up.
    #[must_use]
    pub fn distance(&self, distribution: &Distribution) -> f64 {
        let total = distribution.total() as f64;
        if total == 0.0 {
            return 1.0;
        }

        let mut extra = vec![0.0_f64; self.nodes_per_level[0]];
        for (code, q) in self.global.iter().enumerate() {
            extra[self.leaf_node[code] as usize] -= q;
        }
        for (code, frequency) in distribution.entries() {
            if let Some(node) = self.leaf_node.get(*code as usize) {
                extra[*node as usize] += f64::from(*frequency) / total;
            }
        }

        let height = (self.nodes_per_level.len() - 1) as f64;
        let mut cost = 0.0;
        for level in 1..self.nodes_per_level.len() {
            let mut pos = vec![0.0_f64; self.nodes_per_level[level]];
            let mut neg = vec![0.0_f64; self.nodes_per_level[level]];
            for (child, e) in extra.iter().enumerate() {
                let parent = self.parent_of[level][child] as usize;
                if *e > 0.0 {
                    pos[parent] += e;
                } else {
                    neg[parent] -= e;
                }
            }
            let weight = level as f64 / height;
            cost += pos
                .iter()
                .zip(&neg)
                .map(|(p, n)| weight * p.min(*n))
                .sum::<f64>();
            extra = pos.iter().zip(&neg).map(|(p, n)| p - n).collect();
        }
        cost
    }
}

impl PrivacyCriterion for HierarchicalDistanceTCloseness {
    fn name(&self) -> &'static str {
        "hierarchical-distance-t-closeness"
    }

    fn is_monotonic(&self, suppression: bool) -> bool {
        !suppression
    }

    fn requirements(&self, requirements: &mut Requirements) {
        requirements.require_distribution(self.sensitive);
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        ctx.distribution(class, self.sensitive)
            .is_some_and(|d| self.distance(d) <= self.t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Data, Hierarchy};

    fn manager(with_hierarchy: bool) -> DataManager {
        let mut data = Data::from_rows(&[
            &["zip", "salary"],
            &["1", "3k"],
            &["1", "4k"],
            &["2", "5k"],
            &["2", "6k"],
        ])
        .expect("data");
        let def = data.definition_mut();
        def.set_quasi_identifier("zip", Hierarchy::from_rows(&[&["1", "*"], &["2", "*"]]));
        if with_hierarchy {
            def.set_sensitive_with_hierarchy(
                "salary",
                Hierarchy::from_rows(&[
                    &["3k", "low", "*"],
                    &["4k", "low", "*"],
                    &["5k", "high", "*"],
                    &["6k", "high", "*"],
                ]),
            );
        } else {
            def.set_sensitive("salary");
        }
        DataManager::new(&data, None).expect("manager")
    }

    #[test]
    fn equal_distance_of_half_split() {
        let model = EqualDistanceTCloseness::new(&manager(false), 0, 0.5).expect("model");
        // class {3k, 4k} against uniform over four values
        let d = Distribution::from_entries(vec![(0, 1), (1, 1)]);
        assert!((model.distance(&d) - 0.5).abs() < 1e-12);
        let all = Distribution::from_entries(vec![(0, 1), (1, 1), (2, 1), (3, 1)]);
        assert!(model.distance(&all).abs() < 1e-12);
    }

    #[test]
    fn hierarchical_distance_weights_by_level() {
        let model = HierarchicalDistanceTCloseness::new(&manager(true), 0, 1.0).expect("model");
        // mass 0.5 moves across the root (level 2 of 2): cost 0.5
        let low = Distribution::from_entries(vec![(0, 1), (1, 1)]);
        assert!((model.distance(&low) - 0.5).abs() < 1e-12);
        // mass 0.5 moves within "low" and "high" (level 1 of 2): cost 0.25
        let mixed = Distribution::from_entries(vec![(0, 1), (2, 1)]);
        assert!((model.distance(&mixed) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn hierarchical_requires_hierarchy() {
        assert!(matches!(
            HierarchicalDistanceTCloseness::new(&manager(false), 0, 0.2),
            Err(ConfigError::DegenerateHierarchy { .. })
        ));
    }

    #[test]
    fn t_must_be_in_unit_interval() {
        assert!(EqualDistanceTCloseness::new(&manager(false), 0, 0.0).is_err());
        assert!(EqualDistanceTCloseness::new(&manager(false), 0, 1.5).is_err());
    }
}
