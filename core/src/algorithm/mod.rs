//! Search strategies over the generalization lattice.
//!
//! - [`flash`]: exhaustive, level by level, with monotonicity propagation
//!   and lower-bound pruning;
//! - [`lightning`]: bounded best-first local search;
//! - [`genetic`]: seeded genetic algorithm.
//!
//! Every strategy records its checks into a [`SolutionSpace`]; the optimum
//! is always the best *checked* anonymous node.

use std::fmt;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::checker::{CheckResult, NodeChecker};
use crate::error::ConfigError;
use crate::lattice::{SolutionSpace, Transformation};

/// Ricerca esaustiva.
pub mod flash;
/// Algoritmo genetico.
pub mod genetic;
/// Ricerca best-first limitata.
pub mod lightning;

pub use flash::Flash;
pub use genetic::Genetic;
pub use lightning::Lightning;

/// Which strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchAlgorithm {
    /// Exhaustive search; the optimum is global.
    Flash,
    /// Best-first heuristic.
    Lightning,
    /// Genetic heuristic.
    Genetic,
    /// Flash up to `heuristic_threshold` nodes, Lightning beyond.
    #[default]
    Auto,
}

impl SearchAlgorithm {
    /// Nome della strategia.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Lightning => "lightning",
            Self::Genetic => "genetic",
            Self::Auto => "auto",
        }
    }

    /// Concrete strategy for a lattice of `size` nodes.
    #[must_use]
    pub const fn resolve(self, size: u64, threshold: u64) -> Self {
        match self {
            Self::Auto if size <= threshold => Self::Flash,
            Self::Auto => Self::Lightning,
            other => other,
        }
    }
}

impl fmt::Display for SearchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit of the heuristic step budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSemantics {
    /// Node checks.
    #[default]
    Checks,
    /// Node expansions (Lightning) or generations (Genetic).
    Expansions,
}

/// Parameters of the heuristic strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Seed of the random generator.
    pub seed: u64,
    /// Seeded generator and no wall-clock limit: repeated runs agree.
    pub deterministic: bool,
    /// Step budget, in [`StepSemantics`] units.
    pub step_limit: u64,
    /// Wall-clock budget; ignored when `deterministic`.
    pub time_limit_ms: Option<u64>,
    /// Unit of `step_limit`.
    pub step_semantics: StepSemantics,
    /// Individuals per generation (Genetic).
    pub population_size: usize,
    /// Share of the population carried over unchanged (Genetic).
    pub elite_fraction: f64,
    /// Probability of recombining two parents (Genetic).
    pub crossover_rate: f64,
    /// Per-gene mutation probability (Genetic).
    pub mutation_rate: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            deterministic: true,
            step_limit: 1_000,
            time_limit_ms: None,
            step_semantics: StepSemantics::Checks,
            population_size: 32,
            elite_fraction: 0.2,
            crossover_rate: 0.7,
            mutation_rate: 0.1,
        }
    }
}

impl HeuristicConfig {
    /// Rejects empty budgets and rates outside `[0, 1]`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBudget`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_limit == 0 {
            return Err(ConfigError::InvalidBudget(
                "heuristic.step_limit must be positive".to_string(),
            ));
        }
        if self.time_limit_ms == Some(0) {
            return Err(ConfigError::InvalidBudget(
                "heuristic.time_limit_ms must be positive when set".to_string(),
            ));
        }
        if self.population_size < 2 {
            return Err(ConfigError::InvalidBudget(format!(
                "heuristic.population_size must be at least 2, got {}",
                self.population_size
            )));
        }
        for (name, value) in [
            ("elite_fraction", self.elite_fraction),
            ("crossover_rate", self.crossover_rate),
            ("mutation_rate", self.mutation_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidBudget(format!(
                    "heuristic.{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn rng(&self) -> StdRng {
        if self.deterministic {
            StdRng::seed_from_u64(self.seed)
        } else {
            StdRng::from_entropy()
        }
    }
}

/// Strategy selection and parallelism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Strategy.
    pub algorithm: SearchAlgorithm,
    /// Evaluate the nodes of one batch on the rayon pool.
    pub parallel: bool,
    /// Lattice size up to which `Auto` picks Flash.
    pub heuristic_threshold: u64,
    /// Heuristic parameters.
    pub heuristic: HeuristicConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            algorithm: SearchAlgorithm::Auto,
            parallel: false,
            heuristic_threshold: 100_000,
            heuristic: HeuristicConfig::default(),
        }
    }
}

/// What a strategy works with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchContext<'a> {
    pub(crate) checker: NodeChecker<'a>,
    pub(crate) config: &'a SearchConfig,
    /// Metric monotonic under the configured suppression.
    pub(crate) metric_monotonic: bool,
}

impl SearchContext<'_> {
    /// Checks `t` and records the outcome.
    pub(crate) fn check_and_record(
        &self,
        space: &mut SolutionSpace,
        t: &Transformation,
    ) -> CheckResult {
        let result = self.checker.check(t);
        space.record(t, result.anonymous, result.loss);
        result
    }

    /// Checks a batch and records the outcomes in batch order.
    pub(crate) fn check_batch(
        &self,
        space: &mut SolutionSpace,
        nodes: &[Transformation],
    ) -> Vec<CheckResult> {
        let results = self.checker.check_all(nodes, self.config.parallel);
        for (t, result) in nodes.iter().zip(&results) {
            space.record(t, result.anonymous, result.loss);
        }
        results
    }
}

/// Lattice search.
pub(crate) trait SearchStrategy {
    /// Nome per i log.
    fn name(&self) -> &'static str;

    /// Explores the lattice of `space`, recording every check.
    fn search(&self, ctx: &SearchContext<'_>, space: &mut SolutionSpace);
}

/// Step and time budget of a heuristic run.
#[derive(Debug)]
pub(crate) struct Budget {
    steps: u64,
    limit: u64,
    deadline: Option<Instant>,
}

impl Budget {
    pub(crate) fn new(config: &HeuristicConfig) -> Self {
        let deadline = if config.deterministic {
            None
        } else {
            config
                .time_limit_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms))
        };
        Self {
            steps: 0,
            limit: config.step_limit,
            deadline,
        }
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.steps)
    }

    pub(crate) fn spend(&mut self, steps: u64) {
        self.steps = self.steps.saturating_add(steps);
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.steps >= self.limit || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub(crate) const fn used(&self) -> u64 {
        self.steps
    }
}

/// Runs `algorithm` (already resolved, never `Auto`).
pub(crate) fn run(algorithm: SearchAlgorithm, ctx: &SearchContext<'_>, space: &mut SolutionSpace) {
    let strategy: &dyn SearchStrategy = match algorithm {
        SearchAlgorithm::Flash | SearchAlgorithm::Auto => &Flash,
        SearchAlgorithm::Lightning => &Lightning,
        SearchAlgorithm::Genetic => &Genetic,
    };
    tracing::debug!(strategy = strategy.name(), "search started");
    strategy.search(ctx, space);
    tracing::debug!(
        strategy = strategy.name(),
        checked = space.checked_count(),
        "search finished"
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::criteria::{ModelSet, PrivacyModel};
    use crate::data::encoding::DataManager;
    use crate::data::Data;
    use crate::groupify::tests::example_data;
    use crate::groupify::HistoryCache;
    use crate::lattice::{Lattice, Propagation};
    use crate::metric::{InformationLoss, Metric, MetricConfig};
    use crate::observer::SearchObserver;

    /// Runs one strategy on `data` and returns the explored space.
    pub(crate) fn explore(
        data: &Data,
        models: &[PrivacyModel],
        limit: f64,
        algorithm: SearchAlgorithm,
        config: SearchConfig,
    ) -> SolutionSpace {
        let manager = DataManager::new(data, None).expect("manager");
        let set = ModelSet::resolve(models, &manager, limit).expect("models");
        let metric = Metric::new(&MetricConfig::default(), &manager).expect("metric");
        let history = Mutex::new(HistoryCache::default());
        let observer = SearchObserver::new();
        let propagation = if set.is_monotonic() {
            Propagation::Formal
        } else {
            Propagation::None
        };
        let ctx = SearchContext {
            checker: NodeChecker::new(&manager, &set, &metric, &history, &observer),
            config: &config,
            metric_monotonic: metric.is_monotonic(set.suppression()),
        };
        let mut space = SolutionSpace::new(Lattice::from_heights(&manager.heights()), propagation);
        run(algorithm, &ctx, &mut space);
        space
    }

    pub(crate) fn optimum_levels(space: &SolutionSpace) -> Option<Vec<u32>> {
        space.optimum().map(|(t, _)| t.levels().to_vec())
    }

    #[test]
    fn auto_resolves_by_size() {
        assert_eq!(SearchAlgorithm::Auto.resolve(48, 100), SearchAlgorithm::Flash);
        assert_eq!(
            SearchAlgorithm::Auto.resolve(101, 100),
            SearchAlgorithm::Lightning
        );
        assert_eq!(
            SearchAlgorithm::Genetic.resolve(1, 100),
            SearchAlgorithm::Genetic
        );
    }

    #[test]
    fn heuristic_budget_is_validated() {
        assert!(HeuristicConfig::default().validate().is_ok());
        let zero = HeuristicConfig {
            step_limit: 0,
            ..HeuristicConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidBudget(_))));
        let rate = HeuristicConfig {
            mutation_rate: 1.5,
            ..HeuristicConfig::default()
        };
        assert!(rate.validate().is_err());
    }

    #[test]
    fn budget_counts_steps() {
        let mut budget = Budget::new(&HeuristicConfig {
            step_limit: 3,
            ..HeuristicConfig::default()
        });
        budget.spend(2);
        assert_eq!(budget.remaining(), 1);
        assert!(!budget.exhausted());
        budget.spend(1);
        assert!(budget.exhausted());
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn heuristics_find_an_anonymous_node() {
        let data = example_data();
        let k2 = [PrivacyModel::KAnonymity { k: 2 }];
        for algorithm in [SearchAlgorithm::Lightning, SearchAlgorithm::Genetic] {
            let space = explore(&data, &k2, 0.0, algorithm, SearchConfig::default());
            let (best, loss) = space.optimum().expect("solution");
            assert!(loss >= InformationLoss::new(0.0));
            assert!(space.state(&best).anonymity.is_anonymous());
        }
    }
}
