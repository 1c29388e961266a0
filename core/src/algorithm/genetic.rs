use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;

use crate::algorithm::{Budget, SearchContext, SearchStrategy, StepSemantics};
use crate::lattice::{Lattice, SolutionSpace, Transformation};

/// Generations in a row without new checks before the run gives up.
const STALE_GENERATIONS: u32 = 50;

/// Seeded genetic algorithm over level vectors.
///
/// Fitness orders individuals by anonymity first, then by loss, then
/// lexicographically. Each generation keeps the elite, fills the rest
/// with children of tournament-selected parents (uniform crossover,
/// ±1 mutation per gene) and checks the children not seen before.
#[derive(Debug, Clone, Copy, Default)]
pub struct Genetic;

impl SearchStrategy for Genetic {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn search(&self, ctx: &SearchContext<'_>, space: &mut SolutionSpace) {
        let heuristic = &ctx.config.heuristic;
        let lattice = space.lattice().clone();
        let mut rng = heuristic.rng();
        let mut budget = Budget::new(heuristic);
        let count_checks = heuristic.step_semantics == StepSemantics::Checks;
        let size = heuristic.population_size.max(2);
        let elites = ((heuristic.elite_fraction * size as f64).ceil() as usize).clamp(1, size);

        // 1) popolazione iniziale: estremi del reticolo più individui casuali
        let mut population = vec![lattice.top(), lattice.bottom()];
        while population.len() < size {
            population.push(random_node(&lattice, &mut rng));
        }
        population.truncate(size);
        evaluate(ctx, space, &mut budget, count_checks, &population);

        let mut generations = 0_u64;
        let mut stale = 0_u32;
        while !budget.exhausted()
            && (space.checked_count() as u64) < lattice.size()
            && stale < STALE_GENERATIONS
        {
            // 2) selezione
            population.sort_by(|a, b| fitness(space, a, b));
            let mut next: Vec<Transformation> = population[..elites].to_vec();
            while next.len() < size {
                let first = tournament(&population, space, &mut rng);
                let second = tournament(&population, space, &mut rng);
                let child = if rng.gen_bool(heuristic.crossover_rate) {
                    crossover(first, second, &mut rng)
                } else {
                    first.clone()
                };
                next.push(mutate(&lattice, &child, heuristic.mutation_rate, &mut rng));
            }
            population = next;

            // 3) valutazione dei figli nuovi
            let checked = evaluate(ctx, space, &mut budget, count_checks, &population);
            stale = if checked == 0 { stale + 1 } else { 0 };
            if !count_checks {
                budget.spend(1);
            }
            generations += 1;
        }

        tracing::debug!(
            generations,
            steps = budget.used(),
            checked = space.checked_count(),
            "genetic search finished"
        );
    }
}

/// Checks the unseen members of `population`; returns how many were checked.
fn evaluate(
    ctx: &SearchContext<'_>,
    space: &mut SolutionSpace,
    budget: &mut Budget,
    count_checks: bool,
    population: &[Transformation],
) -> usize {
    let mut fresh: Vec<Transformation> = population
        .iter()
        .filter(|t| !space.is_checked(t))
        .cloned()
        .collect();
    fresh.sort();
    fresh.dedup();
    if count_checks {
        let remaining = usize::try_from(budget.remaining()).unwrap_or(usize::MAX);
        fresh.truncate(remaining);
        budget.spend(fresh.len() as u64);
    }
    ctx.check_batch(space, &fresh);
    fresh.len()
}

/// Anonymous before non-anonymous before unchecked; then loss, then
/// lexicographic order.
fn fitness(space: &SolutionSpace, a: &Transformation, b: &Transformation) -> Ordering {
    let key = |t: &Transformation| {
        let state = space.state(t);
        let rank = match (state.checked, state.anonymity.is_anonymous()) {
            (true, true) => 0_u8,
            (true, false) => 1,
            (false, _) => 2,
        };
        (rank, state.loss)
    };
    let (rank_a, loss_a) = key(a);
    let (rank_b, loss_b) = key(b);
    rank_a
        .cmp(&rank_b)
        .then_with(|| loss_a.cmp(&loss_b))
        .then_with(|| a.cmp(b))
}

fn tournament<'p>(
    population: &'p [Transformation],
    space: &SolutionSpace,
    rng: &mut StdRng,
) -> &'p Transformation {
    let a = &population[rng.gen_range(0..population.len())];
    let b = &population[rng.gen_range(0..population.len())];
    if fitness(space, a, b) == Ordering::Greater {
        b
    } else {
        a
    }
}

fn random_node(lattice: &Lattice, rng: &mut StdRng) -> Transformation {
    let levels: Vec<u32> = lattice
        .min_levels()
        .iter()
        .zip(lattice.max_levels())
        .map(|(lo, hi)| rng.gen_range(*lo..=*hi))
        .collect();
    Transformation::new(levels)
}

fn crossover(a: &Transformation, b: &Transformation, rng: &mut StdRng) -> Transformation {
    let levels: Vec<u32> = a
        .levels()
        .iter()
        .zip(b.levels())
        .map(|(x, y)| if rng.gen_bool(0.5) { *x } else { *y })
        .collect();
    Transformation::new(levels)
}

fn mutate(lattice: &Lattice, t: &Transformation, rate: f64, rng: &mut StdRng) -> Transformation {
    let levels: Vec<u32> = t
        .levels()
        .iter()
        .zip(lattice.min_levels().iter().zip(lattice.max_levels()))
        .map(|(level, (lo, hi))| {
            if lo == hi || !rng.gen_bool(rate) {
                return *level;
            }
            if *level == *hi || (*level > *lo && rng.gen_bool(0.5)) {
                level - 1
            } else {
                level + 1
            }
        })
        .collect();
    Transformation::new(levels)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::algorithm::tests::explore;
    use crate::algorithm::{HeuristicConfig, SearchAlgorithm, SearchConfig};
    use crate::criteria::PrivacyModel;
    use crate::groupify::tests::example_data;

    fn config(seed: u64, step_limit: u64, step_semantics: StepSemantics) -> SearchConfig {
        SearchConfig {
            heuristic: HeuristicConfig {
                seed,
                step_limit,
                step_semantics,
                population_size: 8,
                ..HeuristicConfig::default()
            },
            ..SearchConfig::default()
        }
    }

    fn run(seed: u64, step_limit: u64, step_semantics: StepSemantics) -> SolutionSpace {
        explore(
            &example_data(),
            &[PrivacyModel::KAnonymity { k: 2 }],
            0.0,
            SearchAlgorithm::Genetic,
            config(seed, step_limit, step_semantics),
        )
    }

    #[test]
    fn same_seed_same_exploration() {
        let a = run(7, 20, StepSemantics::Checks);
        let b = run(7, 20, StepSemantics::Checks);
        assert_eq!(a.checked_nodes(), b.checked_nodes());
        assert!(a.checked_count() <= 20);
    }

    #[test]
    fn generation_budget_terminates() {
        let space = run(3, 4, StepSemantics::Expansions);
        // top is part of the first generation
        assert!(space.optimum().is_some());
    }

    #[test]
    fn operators_stay_inside_the_lattice() {
        let lattice = Lattice::from_heights(&[3, 2, 6]);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let a = random_node(&lattice, &mut rng);
            let b = random_node(&lattice, &mut rng);
            assert!(lattice.contains(&a));
            assert!(lattice.contains(&crossover(&a, &b, &mut rng)));
            assert!(lattice.contains(&mutate(&lattice, &a, 1.0, &mut rng)));
        }
    }
}
