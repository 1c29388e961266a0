//! Outcome of one `anonymize()` call.
//!
//! Il risultato conserva lo spazio delle soluzioni esplorato, l'ottimo
//! globale (se esiste) e quanto serve per materializzare un output:
//! dati codificati, modelli risolti e metrica. Un risultato appartiene a
//! un'epoca della sorgente; quando la sorgente viene rilasciata il
//! risultato diventa orfano.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::algorithm::SearchAlgorithm;
use crate::criteria::ModelSet;
use crate::data::encoding::DataManager;
use crate::error::{HandleError, Result};
use crate::handle::{lock_lifecycle, HandleState, OutputHandle, SourceLifecycle};
use crate::lattice::{Anonymity, LossRange, SolutionSpace, Transformation};
use crate::metric::{InformationLoss, Metric};
use crate::observer::SearchStatistics;
use crate::recoding::{LocalRecodingConfig, LocalRecodingOptimizer, RecodingReport};

/// One node of the lattice view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatticeNode {
    /// Level vector.
    pub transformation: Transformation,
    /// Checked or inferred anonymity.
    pub anonymity: Anonymity,
    /// `true` if evaluated against the data.
    pub checked: bool,
    /// Loss bounds: a point for checked nodes, `None` when nothing is known.
    pub loss: Option<LossRange>,
}

/// Lattice nodes grouped by generalization level, lowest level first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatticeView {
    /// `levels[i]` holds the nodes of level `min_level + i`, in
    /// lexicographic order.
    pub levels: Vec<Vec<LatticeNode>>,
    /// Total number of nodes of the lattice.
    pub size: u64,
    /// `true` if the view stops before the end of the lattice.
    pub truncated: bool,
}

/// Counts of node states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatticeStatistics {
    /// Nodes of the lattice.
    pub size: u64,
    /// Nodes evaluated against the data.
    pub checked: u64,
    /// Anonymous nodes (checked or inferred under formal monotonicity).
    pub anonymous: u64,
    /// Non-anonymous nodes (checked or inferred under formal monotonicity).
    pub not_anonymous: u64,
    /// Inferred under practical monotonicity.
    pub probably_anonymous: u64,
    /// Inferred under practical monotonicity.
    pub probably_not_anonymous: u64,
    /// Never reached.
    pub unknown: u64,
    /// `false` if only checked nodes were counted (lattice larger than the
    /// view budget).
    pub complete: bool,
    /// Counters of the search.
    pub search: SearchStatistics,
}

/// Result of [`crate::Anonymizer::anonymize`].
#[derive(Debug)]
pub struct AnonymizationResult {
    lifecycle: Arc<Mutex<SourceLifecycle>>,
    epoch: u64,
    manager: Arc<DataManager>,
    models: ModelSet,
    metric: Metric,
    space: SolutionSpace,
    algorithm: SearchAlgorithm,
    optimum: Option<(Transformation, InformationLoss)>,
    search: SearchStatistics,
    max_view_nodes: u64,
    elapsed: Duration,
}

/// Parts of a finished search.
pub(crate) struct SearchOutcome {
    pub(crate) lifecycle: Arc<Mutex<SourceLifecycle>>,
    pub(crate) epoch: u64,
    pub(crate) manager: Arc<DataManager>,
    pub(crate) models: ModelSet,
    pub(crate) metric: Metric,
    pub(crate) space: SolutionSpace,
    pub(crate) algorithm: SearchAlgorithm,
    pub(crate) search: SearchStatistics,
    pub(crate) max_view_nodes: u64,
    pub(crate) elapsed: Duration,
}

impl AnonymizationResult {
    pub(crate) fn new(outcome: SearchOutcome) -> Self {
        let optimum = outcome.space.optimum();
        Self {
            lifecycle: outcome.lifecycle,
            epoch: outcome.epoch,
            manager: outcome.manager,
            models: outcome.models,
            metric: outcome.metric,
            space: outcome.space,
            algorithm: outcome.algorithm,
            optimum,
            search: outcome.search,
            max_view_nodes: outcome.max_view_nodes,
            elapsed: outcome.elapsed,
        }
    }

    /// Best checked anonymous transformation, `None` if no node qualifies.
    #[must_use]
    pub fn global_optimum(&self) -> Option<&Transformation> {
        self.optimum.as_ref().map(|(t, _)| t)
    }

    /// Loss of the optimum.
    #[must_use]
    pub fn optimum_loss(&self) -> Option<InformationLoss> {
        self.optimum.as_ref().map(|(_, loss)| *loss)
    }

    /// Strategy that produced the result (`Auto` already resolved).
    #[must_use]
    pub const fn algorithm(&self) -> SearchAlgorithm {
        self.algorithm
    }

    /// `true` for exhaustive searches: the optimum is global.
    #[must_use]
    pub fn is_optimal(&self) -> bool {
        self.algorithm == SearchAlgorithm::Flash
    }

    /// Wall-clock duration of the search.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Names of the quasi-identifiers, in level-vector order.
    #[must_use]
    pub fn quasi_identifiers(&self) -> Vec<&str> {
        self.manager.qis().iter().map(|qi| qi.name.as_str()).collect()
    }

    /// Explored solution space.
    #[must_use]
    pub const fn solution_space(&self) -> &SolutionSpace {
        &self.space
    }

    /// `false` once the source was released after this result was computed.
    #[must_use]
    pub fn is_current(&self) -> bool {
        lock_lifecycle(&self.lifecycle).is_ok_and(|l| l.epoch() == self.epoch)
    }

    fn ensure_current(&self) -> Result<(), HandleError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(HandleError::Orphaned)
        }
    }

    fn loss_range(&self, t: &Transformation, loss: Option<InformationLoss>) -> Option<LossRange> {
        if let Some(loss) = loss {
            return Some(LossRange::point(loss));
        }
        let min = self.metric.lower_bound(t)?;
        let unbounded = InformationLoss::new(f64::INFINITY);
        let max = if self.metric.is_monotonic(self.models.suppression()) {
            self.space.checked_upper_bound(t).unwrap_or(unbounded)
        } else {
            unbounded
        };
        Some(LossRange {
            min,
            max: max.max(min),
        })
    }

    /// State of one node, `None` if `t` is outside the lattice.
    #[must_use]
    pub fn node(&self, t: &Transformation) -> Option<LatticeNode> {
        if !self.space.lattice().contains(t) {
            return None;
        }
        let state = self.space.state(t);
        Some(LatticeNode {
            transformation: t.clone(),
            anonymity: state.anonymity,
            checked: state.checked,
            loss: self.loss_range(t, state.loss),
        })
    }

    /// Nodes level by level, up to the configured view budget.
    #[must_use]
    pub fn lattice(&self) -> LatticeView {
        let lattice = self.space.lattice();
        let mut levels = Vec::new();
        let mut remaining = self.max_view_nodes;
        let mut truncated = false;

        for level in lattice.min_level()..=lattice.max_level() {
            let mut nodes = lattice.nodes_at_level(level);
            let available = usize::try_from(remaining).unwrap_or(usize::MAX);
            if nodes.len() > available {
                nodes.truncate(available);
                truncated = true;
            }
            remaining = remaining.saturating_sub(nodes.len() as u64);
            levels.push(nodes.iter().filter_map(|t| self.node(t)).collect());
            if truncated {
                break;
            }
        }

        LatticeView {
            levels,
            size: lattice.size(),
            truncated,
        }
    }

    /// State counts over the whole lattice (only checked nodes when the
    /// lattice exceeds the view budget).
    #[must_use]
    pub fn statistics(&self) -> LatticeStatistics {
        let lattice = self.space.lattice();
        let mut stats = LatticeStatistics {
            size: lattice.size(),
            checked: self.space.checked_count() as u64,
            complete: lattice.size() <= self.max_view_nodes,
            search: self.search,
            ..LatticeStatistics::default()
        };

        let mut count = |anonymity: Anonymity| match anonymity {
            Anonymity::Anonymous => stats.anonymous += 1,
            Anonymity::NotAnonymous => stats.not_anonymous += 1,
            Anonymity::ProbablyAnonymous => stats.probably_anonymous += 1,
            Anonymity::ProbablyNotAnonymous => stats.probably_not_anonymous += 1,
            Anonymity::Unknown => stats.unknown += 1,
        };
        if lattice.size() <= self.max_view_nodes {
            for index in 0..lattice.size() {
                count(self.space.state(&lattice.transformation(index)).anonymity);
            }
        } else {
            for (_, state) in self.space.checked_nodes() {
                count(state.anonymity);
            }
        }
        stats
    }

    /// Output of the global optimum; locks the source.
    ///
    /// # Errors
    ///
    /// [`HandleError::NoSolution`] without a global optimum, plus every error
    /// of [`AnonymizationResult::output_for`].
    pub fn output(&self) -> Result<OutputHandle> {
        let optimum = self.global_optimum().ok_or(HandleError::NoSolution)?;
        self.output_for(optimum)
    }

    /// Output of any node of the lattice; locks the source.
    ///
    /// # Errors
    ///
    /// - [`HandleError::Orphaned`] if the source was released since the search;
    /// - [`HandleError::UnknownTransformation`] for a node outside the lattice;
    /// - [`HandleError::SourceLocked`] while another handle locks the source.
    pub fn output_for(&self, t: &Transformation) -> Result<OutputHandle> {
        self.ensure_current()?;
        if !self.space.lattice().contains(t) {
            return Err(HandleError::UnknownTransformation.into());
        }
        let handle =
            OutputHandle::materialize(&self.lifecycle, Arc::clone(&self.manager), &self.models, t)?;
        tracing::info!(transformation = %t, "output handle created");
        Ok(handle)
    }

    /// Local recoding of `handle`; see [`LocalRecodingOptimizer`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError`](crate::ConfigError) for an invalid `config`;
    /// - [`HandleError::Orphaned`] for an outdated result or a released handle;
    /// - [`RollbackRequired`](crate::RollbackRequired) when the re-check fails (see
    ///   [`LocalRecodingOptimizer::optimize`]).
    pub fn optimize(
        &self,
        handle: &mut OutputHandle,
        config: &LocalRecodingConfig,
    ) -> Result<RecodingReport> {
        config.validate()?;
        self.ensure_current()?;
        if handle.state() == HandleState::Orphaned {
            return Err(HandleError::Orphaned.into());
        }
        let optimizer = LocalRecodingOptimizer::new(
            &self.manager,
            &self.models,
            &self.metric,
            self.space.lattice(),
        );
        Ok(optimizer.optimize(handle, config)?)
    }
}
