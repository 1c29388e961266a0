use crate::algorithm::{SearchContext, SearchStrategy};
use crate::lattice::{Propagation, SolutionSpace};
use crate::metric::InformationLoss;

/// Exhaustive search, breadth-first by generalization level.
///
/// 1) With propagation, `top` is checked first: if even the most general
///    node fails, no node can pass.
/// 2) Levels are visited in ascending order, nodes of a level in
///    lexicographic order.
/// 3) Nodes with an inferred state are skipped; inferred-anonymous nodes
///    are still checked when the metric is not monotonic, since their loss
///    may beat the known ones.
/// 4) Nodes whose metric lower bound exceeds the best loss found on the
///    previous levels are pruned.
/// 5) The remaining nodes of a level are checked as one batch and recorded
///    afterwards, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flash;

impl SearchStrategy for Flash {
    fn name(&self) -> &'static str {
        "flash"
    }

    fn search(&self, ctx: &SearchContext<'_>, space: &mut SolutionSpace) {
        let lattice = space.lattice().clone();

        // 1) top
        if space.propagation() != Propagation::None {
            let top = lattice.top();
            if !ctx.check_and_record(space, &top).anonymous {
                tracing::info!(top = %top, "most general transformation is not anonymous");
                return;
            }
        }

        let mut best: Option<InformationLoss> = space.optimum().map(|(_, loss)| loss);

        // 2) livelli crescenti
        for level in lattice.min_level()..=lattice.max_level() {
            let mut batch = Vec::new();
            let mut pruned = 0_u64;

            for t in lattice.nodes_at_level(level) {
                if space.is_checked(&t) {
                    continue;
                }
                // 3)
                match space.inferred(&t) {
                    Some(anonymity) if anonymity.is_anonymous() && !ctx.metric_monotonic => {}
                    Some(_) => continue,
                    None => {}
                }
                // 4)
                if let (Some(bound), Some(best)) = (ctx.checker.metric().lower_bound(&t), best) {
                    if bound > best {
                        pruned += 1;
                        continue;
                    }
                }
                batch.push(t);
            }

            if pruned > 0 {
                ctx.checker.observer().record_bound_pruned(pruned);
            }
            if batch.is_empty() {
                continue;
            }

            // 5)
            let results = ctx.check_batch(space, &batch);
            for result in results.iter().filter(|r| r.anonymous) {
                best = Some(best.map_or(result.loss, |b| b.min(result.loss)));
            }
            tracing::debug!(level, checked = batch.len(), pruned, "level done");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::algorithm::tests::{explore, optimum_levels};
    use crate::algorithm::{SearchAlgorithm, SearchConfig};
    use crate::criteria::PrivacyModel;
    use crate::data::Hierarchy;
    use crate::groupify::tests::example_data;
    use crate::criteria::EntropyEstimator;
    use crate::lattice::{Anonymity, Lattice, SolutionSpace};

    fn flash(models: &[PrivacyModel], limit: f64, parallel: bool) -> SolutionSpace {
        explore(
            &example_data(),
            models,
            limit,
            SearchAlgorithm::Flash,
            SearchConfig {
                parallel,
                ..SearchConfig::default()
            },
        )
    }

    #[test]
    fn finds_known_optima() {
        let k2 = flash(&[PrivacyModel::KAnonymity { k: 2 }], 0.0, false);
        assert_eq!(optimum_levels(&k2), Some(vec![1, 1, 2]));
        let k3 = flash(&[PrivacyModel::KAnonymity { k: 3 }], 0.0, false);
        assert_eq!(optimum_levels(&k3), Some(vec![2, 0, 3]));
    }

    #[test]
    fn parallel_batches_do_not_change_the_outcome() {
        let models = [PrivacyModel::KAnonymity { k: 2 }];
        let sequential = flash(&models, 0.0, false);
        let parallel = flash(&models, 0.0, true);
        assert_eq!(optimum_levels(&sequential), optimum_levels(&parallel));
        assert_eq!(sequential.checked_nodes(), parallel.checked_nodes());
    }

    #[test]
    fn formal_propagation_is_consistent() {
        let space = flash(&[PrivacyModel::KAnonymity { k: 2 }], 0.0, false);
        let lattice = Lattice::from_heights(&[3, 2, 6]);
        for index in 0..lattice.size() {
            let t = lattice.transformation(index);
            if space.state(&t).anonymity == Anonymity::Anonymous {
                for s in lattice.successors(&t) {
                    assert_eq!(space.state(&s).anonymity, Anonymity::Anonymous, "{s}");
                }
            }
        }
    }

    #[test]
    fn non_monotonic_search_checks_every_anonymous_node() {
        // with suppression, entropy l-diversity is not monotonic
        let mut data = example_data();
        data.definition_mut().set_sensitive("age");
        let space = explore(
            &data,
            &[PrivacyModel::EntropyLDiversity {
                attribute: "age".into(),
                l: 1.5,
                estimator: EntropyEstimator::Shannon,
            }],
            0.3,
            SearchAlgorithm::Flash,
            SearchConfig::default(),
        );
        let lattice = Lattice::from_heights(&[2, 6]);
        for index in 0..lattice.size() {
            let state = space.state(&lattice.transformation(index));
            if state.anonymity.is_anonymous() {
                assert!(state.checked);
            }
        }
        assert!(space.optimum().is_some());
    }

    #[test]
    fn unreachable_privacy_means_no_optimum() {
        let mut data = example_data();
        data.definition_mut().set_quasi_identifier(
            "zipcode",
            Hierarchy::from_rows(&[&["81667"], &["81675"], &["81925"], &["81931"]]),
        );
        let space = explore(
            &data,
            &[PrivacyModel::KAnonymity { k: 2 }],
            0.0,
            SearchAlgorithm::Flash,
            SearchConfig::default(),
        );
        assert!(space.optimum().is_none());
        assert_eq!(space.checked_count(), 1);
    }
}
