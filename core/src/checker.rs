//! Node evaluation.
//!
//! A check builds the equivalence classes of one transformation (through
//! the history cache when a predecessor snapshot is available), runs the
//! privacy models on them and scores the result with the metric.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use crate::criteria::{ModelEvaluation, ModelSet};
use crate::data::encoding::DataManager;
use crate::groupify::{Groupify, HistoryCache, Requirements};
use crate::lattice::Transformation;
use crate::metric::{ClassCost, InformationLoss, Metric};
use crate::observer::SearchObserver;

/// Outcome of one check.
#[derive(Debug, Clone)]
pub(crate) struct CheckResult {
    pub(crate) anonymous: bool,
    pub(crate) loss: InformationLoss,
    pub(crate) evaluation: ModelEvaluation,
}

/// Everything needed to evaluate a node; shared by reference across the
/// worker threads of a parallel batch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeChecker<'a> {
    manager: &'a DataManager,
    models: &'a ModelSet,
    metric: &'a Metric,
    history: &'a Mutex<HistoryCache>,
    observer: &'a SearchObserver,
}

impl<'a> NodeChecker<'a> {
    pub(crate) const fn new(
        manager: &'a DataManager,
        models: &'a ModelSet,
        metric: &'a Metric,
        history: &'a Mutex<HistoryCache>,
        observer: &'a SearchObserver,
    ) -> Self {
        Self {
            manager,
            models,
            metric,
            history,
            observer,
        }
    }

    pub(crate) const fn metric(&self) -> &'a Metric {
        self.metric
    }

    pub(crate) const fn observer(&self) -> &'a SearchObserver {
        self.observer
    }

    /// Evaluates `t` against the data.
    pub(crate) fn check(&self, t: &Transformation) -> CheckResult {
        self.observer.record_check();
        let groupify = self.groupify(t);
        let evaluation = self
            .models
            .evaluate(self.manager, groupify.classes(), |_| t.levels());

        let costs: Vec<ClassCost<'_>> = groupify
            .classes()
            .iter()
            .zip(&evaluation.suppressed)
            .map(|(class, suppressed)| ClassCost {
                class,
                levels: t.levels(),
                suppressed: *suppressed,
            })
            .collect();
        let loss = self.metric.evaluate(self.manager, &costs);

        tracing::trace!(
            transformation = %t,
            anonymous = evaluation.anonymous,
            outliers = evaluation.outliers,
            loss = loss.value(),
            "node checked"
        );

        CheckResult {
            anonymous: evaluation.anonymous,
            loss,
            evaluation,
        }
    }

    /// Evaluates a batch; results are aligned with `nodes`.
    ///
    /// With `parallel` the nodes are spread over the rayon pool. Recording
    /// the results stays with the caller, so the outcome does not depend
    /// on scheduling.
    pub(crate) fn check_all(&self, nodes: &[Transformation], parallel: bool) -> Vec<CheckResult> {
        if parallel && nodes.len() > 1 {
            nodes.par_iter().map(|t| self.check(t)).collect()
        } else {
            nodes.iter().map(|t| self.check(t)).collect()
        }
    }

    /// Classes of `t`: an exact cached snapshot, a coarsened ancestor or a
    /// full scan, in this order of preference.
    fn groupify(&self, t: &Transformation) -> Arc<Groupify> {
        // mutex avvelenato: si rinuncia alla cache, non alla correttezza
        let ancestor = self
            .history
            .lock()
            .ok()
            .and_then(|mut history| history.best_ancestor(t));

        self.observer.record_cache(ancestor.is_some());
        let (groupify, derived_from) = match ancestor {
            Some(snapshot) if snapshot.transformation() == t => return snapshot,
            Some(snapshot) => (Groupify::coarsen(self.manager, &snapshot, t), snapshot.len()),
            None => (
                Groupify::build(self.manager, t, self.models.requirements()),
                self.manager.num_rows(),
            ),
        };

        let groupify = Arc::new(groupify);
        if let Ok(mut history) = self.history.lock() {
            if history.store(Arc::clone(&groupify), derived_from, self.manager.num_rows()) {
                self.observer.record_snapshot_stored();
            }
        }
        groupify
    }
}

/// Identity of the cached groupings: quasi-identifier encoding, release
/// population and the sensitive columns whose histograms are kept.
pub(crate) fn cache_fingerprint(manager: &DataManager, requirements: &Requirements) -> u64 {
    let mut hasher = DefaultHasher::new();
    manager.fingerprint().hash(&mut hasher);
    requirements.hash(&mut hasher);
    for sensitive in &requirements.distributions {
        let attribute = &manager.sensitive()[*sensitive];
        attribute.name.hash(&mut hasher);
        for row in 0..manager.num_rows() {
            attribute.code(row).hash(&mut hasher);
        }
    }
    hasher.finish()
}
