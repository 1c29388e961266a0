use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::algorithm::{Budget, SearchContext, SearchStrategy, StepSemantics};
use crate::lattice::{SolutionSpace, Transformation};
use crate::metric::InformationLoss;

/// Best-first local search bounded by a step and time budget.
///
/// Starts from `top` (a baseline solution) and `bottom`, then repeatedly
/// expands the unexpanded non-anonymous node with the lowest loss by
/// checking its direct successors. Anonymous nodes are not expanded when
/// the metric is monotonic: their successors cannot be cheaper.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lightning;

impl SearchStrategy for Lightning {
    fn name(&self) -> &'static str {
        "lightning"
    }

    fn search(&self, ctx: &SearchContext<'_>, space: &mut SolutionSpace) {
        let heuristic = &ctx.config.heuristic;
        let lattice = space.lattice().clone();
        let mut budget = Budget::new(heuristic);
        let count_checks = heuristic.step_semantics == StepSemantics::Checks;
        let mut best: Option<InformationLoss> = None;
        let mut queue: BinaryHeap<Reverse<(InformationLoss, Transformation)>> = BinaryHeap::new();

        for start in [lattice.top(), lattice.bottom()] {
            if space.is_checked(&start) || (count_checks && budget.exhausted()) {
                continue;
            }
            let result = ctx.check_and_record(space, &start);
            if count_checks {
                budget.spend(1);
            }
            if result.anonymous {
                best = Some(best.map_or(result.loss, |b| b.min(result.loss)));
            }
            if !result.anonymous || !ctx.metric_monotonic {
                queue.push(Reverse((result.loss, start)));
            }
        }

        while !budget.exhausted() {
            let Some(Reverse((loss, node))) = queue.pop() else {
                break;
            };
            // a parità di perdita si espande comunque: decide l'ordine lessicografico
            if ctx.metric_monotonic && best.is_some_and(|b| loss > b) {
                continue;
            }

            let mut candidates: Vec<Transformation> = lattice
                .successors(&node)
                .into_iter()
                .filter(|s| !space.is_checked(s))
                .filter(|s| {
                    !(ctx.metric_monotonic && space.inferred(s).is_some_and(|a| a.is_anonymous()))
                })
                .collect();
            candidates.sort();
            if count_checks {
                let remaining = usize::try_from(budget.remaining()).unwrap_or(usize::MAX);
                candidates.truncate(remaining);
            }

            let results = ctx.check_batch(space, &candidates);
            budget.spend(if count_checks {
                candidates.len() as u64
            } else {
                1
            });
            for (t, result) in candidates.into_iter().zip(results) {
                if result.anonymous {
                    best = Some(best.map_or(result.loss, |b| b.min(result.loss)));
                }
                if !result.anonymous || !ctx.metric_monotonic {
                    queue.push(Reverse((result.loss, t)));
                }
            }
        }

        tracing::debug!(
            steps = budget.used(),
            checked = space.checked_count(),
            "lightning budget spent"
        );
    }
}
