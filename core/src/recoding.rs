//! Local recoding.
//!
//! Starting from an anonymous output, tries to bring suppressed records
//! back by generalizing only those records further. Each iteration:
//!
//! 1) collects the currently suppressed records of the release;
//! 2) walks the transformations above the output's one, level by level,
//!    and recodes the suppressed records at each candidate;
//! 3) on the first level where some candidate lowers the number of
//!    outliers, takes the best one: candidates that keep the release
//!    anonymous first, then fewest outliers, lower loss and lexicographic
//!    order;
//! 4) re-checks every model over the whole release. A failing re-check
//!    restores the handle to its state at the call start and is reported
//!    as [`RollbackRequired`].

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::criteria::ModelSet;
use crate::data::encoding::DataManager;
use crate::error::{ConfigError, RollbackRequired};
use crate::handle::{Assessment, OutputHandle, RecordState};
use crate::lattice::{Lattice, Transformation};
use crate::metric::{InformationLoss, Metric};

/// Parameters of [`LocalRecodingOptimizer::optimize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalRecodingConfig {
    /// Stop once the outlier fraction is at most this value.
    pub target_outlier_fraction: f64,
    /// Maximum number of accepted iterations.
    pub max_iterations: usize,
    /// Stop after an iteration that lowered the outlier fraction by less.
    pub min_improvement: f64,
    /// Wall-clock budget.
    pub time_limit_ms: Option<u64>,
}

impl Default for LocalRecodingConfig {
    fn default() -> Self {
        Self {
            target_outlier_fraction: 0.0,
            max_iterations: 10,
            min_improvement: 0.0,
            time_limit_ms: None,
        }
    }
}

impl LocalRecodingConfig {
    /// Rejects fractions outside `[0, 1]` and empty budgets.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBudget`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("target_outlier_fraction", self.target_outlier_fraction),
            ("min_improvement", self.min_improvement),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidBudget(format!(
                    "recoding.{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidBudget(
                "recoding.max_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The outlier fraction reached the target.
    TargetReached,
    /// No candidate lowers the number of outliers.
    NoCandidate,
    /// The last iteration improved less than `min_improvement`.
    MinImprovement,
    /// `max_iterations` accepted iterations.
    IterationLimit,
    /// Wall-clock budget spent.
    TimeLimit,
}

impl StopReason {
    /// Etichetta testuale.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TargetReached => "target-reached",
            Self::NoCandidate => "no-candidate",
            Self::MinImprovement => "min-improvement",
            Self::IterationLimit => "iteration-limit",
            Self::TimeLimit => "time-limit",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a successful optimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecodingReport {
    /// Accepted iterations.
    pub iterations: usize,
    /// Suppressed records before the call.
    pub outliers_before: usize,
    /// Suppressed records after the call.
    pub outliers_after: usize,
    /// Termination cause.
    pub stop_reason: StopReason,
}

struct Candidate {
    state: RecordState,
    outliers: usize,
    loss: InformationLoss,
    transformation: Transformation,
    anonymous: bool,
}

impl Candidate {
    /// Ordering key: anonymous candidates come before the others.
    fn rank(&self) -> (bool, usize, InformationLoss) {
        (!self.anonymous, self.outliers, self.loss)
    }
}

/// Outcome of one candidate scan.
enum Scan {
    Found(Candidate),
    Exhausted,
    OutOfTime,
}

/// Iterative local recoding over an output handle.
#[derive(Debug, Clone, Copy)]
pub struct LocalRecodingOptimizer<'a> {
    manager: &'a DataManager,
    models: &'a ModelSet,
    metric: &'a Metric,
    lattice: &'a Lattice,
}

impl<'a> LocalRecodingOptimizer<'a> {
    pub(crate) const fn new(
        manager: &'a DataManager,
        models: &'a ModelSet,
        metric: &'a Metric,
        lattice: &'a Lattice,
    ) -> Self {
        Self {
            manager,
            models,
            metric,
            lattice,
        }
    }

    /// Refines `handle` in place.
    ///
    /// # Errors
    ///
    /// [`RollbackRequired`] if an accepted recoding breaks a model over the
    /// whole release; `handle` is then back to its state at the call start.
    pub fn optimize(
        &self,
        handle: &mut OutputHandle,
        config: &LocalRecodingConfig,
    ) -> Result<RecodingReport, RollbackRequired> {
        let initial = handle.records.clone();
        let outliers_before = handle.outliers();
        let release = self.manager.release_size().max(1) as f64;
        let deadline = config
            .time_limit_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let base = handle
            .transformation()
            .map_err(|e| RollbackRequired {
                iteration: 0,
                reason: e.to_string(),
            })?
            .clone();

        let mut iterations = 0;
        let stop_reason = loop {
            let outliers = handle.outliers();
            let fraction = outliers as f64 / release;
            if fraction <= config.target_outlier_fraction {
                break StopReason::TargetReached;
            }
            if iterations >= config.max_iterations {
                break StopReason::IterationLimit;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break StopReason::TimeLimit;
            }

            let candidate = match self.best_candidate(&handle.records, &base, outliers, deadline) {
                Scan::Found(candidate) => candidate,
                Scan::Exhausted => break StopReason::NoCandidate,
                Scan::OutOfTime => break StopReason::TimeLimit,
            };

            iterations += 1;
            // 4) verifica sull'intero rilascio
            if !candidate.anonymous {
                handle.records = initial;
                tracing::warn!(iteration = iterations, "local recoding rolled back");
                return Err(RollbackRequired {
                    iteration: iterations,
                    reason: format!(
                        "recoding suppressed records at {} violates the privacy models",
                        candidate.transformation
                    ),
                });
            }

            tracing::debug!(
                iteration = iterations,
                transformation = %candidate.transformation,
                outliers = candidate.outliers,
                loss = candidate.loss.value(),
                "recoding accepted"
            );
            handle.records = candidate.state;
            let improvement = (outliers - candidate.outliers) as f64 / release;
            if improvement < config.min_improvement {
                break StopReason::MinImprovement;
            }
        };

        let report = RecodingReport {
            iterations,
            outliers_before,
            outliers_after: handle.outliers(),
            stop_reason,
        };
        tracing::info!(
            iterations = report.iterations,
            before = report.outliers_before,
            after = report.outliers_after,
            stop = %report.stop_reason,
            "local recoding finished"
        );
        Ok(report)
    }

    fn best_candidate(
        &self,
        current: &RecordState,
        base: &Transformation,
        outliers: usize,
        deadline: Option<Instant>,
    ) -> Scan {
        // 1)
        let targets: Vec<usize> = (0..current.suppressed.len())
            .filter(|row| self.manager.in_release(*row) && current.suppressed[*row])
            .collect();
        if targets.is_empty() {
            return Scan::Exhausted;
        }

        // 2) trasformazioni sopra quella dell'output, per livelli crescenti
        let Ok(above) = Lattice::new(base.levels().to_vec(), self.lattice.max_levels().to_vec())
        else {
            return Scan::Exhausted;
        };
        for level in above.min_level() + 1..=above.max_level() {
            let mut best: Option<Candidate> = None;
            for t in above.nodes_at_level(level) {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Scan::OutOfTime;
                }
                let mut levels = current.levels.clone();
                for row in &targets {
                    levels[*row] = t.clone();
                }
                let assessment = Assessment::of(self.manager, self.models, &levels);
                let suppressed = assessment.suppressed_rows();
                let trial_outliers = (0..suppressed.len())
                    .filter(|row| self.manager.in_release(*row) && suppressed[*row])
                    .count();
                if trial_outliers >= outliers {
                    continue;
                }
                let loss = assessment.loss(self.manager, self.metric, &levels);
                let candidate = Candidate {
                    state: RecordState { levels, suppressed },
                    outliers: trial_outliers,
                    loss,
                    transformation: t,
                    anonymous: assessment.evaluation.anonymous,
                };
                // 3) a parità vince il primo (ordine lessicografico)
                if best.as_ref().map_or(true, |b| candidate.rank() < b.rank()) {
                    best = Some(candidate);
                }
            }
            if let Some(best) = best {
                return Scan::Found(best);
            }
        }
        Scan::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::criteria::PrivacyModel;
    use crate::data::{Data, Hierarchy};
    use crate::handle::SourceLifecycle;
    use crate::metric::MetricConfig;

    /// Eight records: six form two large classes at `[0, 0]`, two are unique.
    fn data() -> Data {
        let mut data = Data::from_rows(&[
            &["zip", "age"],
            &["1000", "20"],
            &["1000", "20"],
            &["1000", "20"],
            &["2000", "30"],
            &["2000", "30"],
            &["2000", "30"],
            &["1001", "21"],
            &["2001", "31"],
        ])
        .expect("data");
        let def = data.definition_mut();
        def.set_quasi_identifier(
            "zip",
            Hierarchy::from_rows(&[
                &["1000", "1***", "*"],
                &["1001", "1***", "*"],
                &["2000", "2***", "*"],
                &["2001", "2***", "*"],
            ]),
        );
        def.set_quasi_identifier(
            "age",
            Hierarchy::from_rows(&[
                &["20", "20-29", "*"],
                &["21", "20-29", "*"],
                &["30", "30-39", "*"],
                &["31", "30-39", "*"],
            ]),
        );
        data
    }

    struct Fixture {
        manager: Arc<DataManager>,
        models: ModelSet,
        metric: Metric,
        lattice: Lattice,
        lifecycle: Arc<Mutex<SourceLifecycle>>,
    }

    impl Fixture {
        fn new(models: &[PrivacyModel]) -> Self {
            Self::with_data(&data(), models)
        }

        fn with_data(data: &Data, models: &[PrivacyModel]) -> Self {
            let manager = Arc::new(DataManager::new(data, None).expect("manager"));
            let models = ModelSet::resolve(models, &manager, 0.25).expect("models");
            let metric = Metric::new(&MetricConfig::default(), &manager).expect("metric");
            let lattice = Lattice::from_heights(&manager.heights());
            Self {
                manager,
                models,
                metric,
                lattice,
                lifecycle: Arc::new(Mutex::new(SourceLifecycle::default())),
            }
        }

        fn output(&self) -> OutputHandle {
            OutputHandle::materialize(
                &self.lifecycle,
                Arc::clone(&self.manager),
                &self.models,
                &Transformation::new(vec![0, 0]),
            )
            .expect("handle")
        }

        fn optimizer(&self) -> LocalRecodingOptimizer<'_> {
            LocalRecodingOptimizer::new(&self.manager, &self.models, &self.metric, &self.lattice)
        }
    }

    #[test]
    fn suppressed_records_are_recovered() {
        let fixture = Fixture::new(&[PrivacyModel::KAnonymity { k: 2 }]);
        let mut output = fixture.output();
        assert_eq!(output.suppressed_count(), Ok(2));

        let report = fixture
            .optimizer()
            .optimize(&mut output, &LocalRecodingConfig::default())
            .expect("optimize");
        assert_eq!(report.outliers_before, 2);
        assert_eq!(report.outliers_after, 0);
        assert_eq!(report.stop_reason, StopReason::TargetReached);
        // both unique records end up in one class at [2, 2]
        assert_eq!(output.row(6).expect("row"), vec!["*", "*"]);
        assert_eq!(output.row(0).expect("row"), vec!["1000", "20"]);
    }

    #[test]
    fn failed_recheck_restores_the_handle() {
        // 2 classes / 6 records pass; after recovering, 3 / 8 > 0.35
        let fixture = Fixture::new(&[
            PrivacyModel::KAnonymity { k: 2 },
            PrivacyModel::AverageReidentificationRisk { threshold: 0.35 },
        ]);
        let mut output = fixture.output();
        let before = output.records.clone();
        let rows_before: Vec<Vec<String>> = (0..8)
            .map(|r| {
                output
                    .row(r)
                    .expect("row")
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        let err = fixture
            .optimizer()
            .optimize(&mut output, &LocalRecodingConfig::default())
            .expect_err("rollback");
        assert_eq!(err.iteration, 1);
        assert_eq!(output.records, before);
        for (r, expected) in rows_before.iter().enumerate() {
            assert_eq!(&output.row(r).expect("row"), expected);
        }
    }

    /// Two unique records `(10, A2)` and `(11, A2)` next to the classes
    /// `(10, A)` and `(20, B)`. At level one, `[1, 0]` recovers both into a
    /// new class (no outliers, risk 3/8) and `[0, 1]` moves `(10, A2)` into
    /// `(10, A)` (one outlier, risk 2/7).
    fn merging_data() -> Data {
        let mut data = Data::from_rows(&[
            &["a", "b"],
            &["10", "A"],
            &["10", "A"],
            &["10", "A"],
            &["20", "B"],
            &["20", "B"],
            &["20", "B"],
            &["10", "A2"],
            &["11", "A2"],
        ])
        .expect("data");
        let def = data.definition_mut();
        def.set_quasi_identifier(
            "a",
            Hierarchy::from_rows(&[
                &["10", "1x", "*"],
                &["11", "1x", "*"],
                &["20", "2x", "*"],
            ]),
        );
        def.set_quasi_identifier(
            "b",
            Hierarchy::from_rows(&[&["A", "A", "*"], &["A2", "A", "*"], &["B", "B", "*"]]),
        );
        data
    }

    #[test]
    fn anonymous_candidates_outrank_fewer_outliers() {
        let fixture = Fixture::with_data(
            &merging_data(),
            &[
                PrivacyModel::KAnonymity { k: 2 },
                PrivacyModel::AverageReidentificationRisk { threshold: 0.35 },
            ],
        );
        let mut output = fixture.output();
        assert_eq!(output.suppressed_count(), Ok(2));

        let report = fixture
            .optimizer()
            .optimize(&mut output, &LocalRecodingConfig::default())
            .expect("no rollback");
        assert_eq!(report.iterations, 1);
        assert_eq!(report.outliers_after, 1);
        assert_eq!(report.stop_reason, StopReason::NoCandidate);
        assert_eq!(output.row(6).expect("row"), vec!["10", "A"]);
        assert!(output.is_outlier(7).expect("row"));
    }

    #[test]
    fn candidate_scan_stops_at_the_deadline() {
        let fixture = Fixture::new(&[PrivacyModel::KAnonymity { k: 2 }]);
        let output = fixture.output();
        let base = Transformation::new(vec![0, 0]);
        let scan = fixture.optimizer().best_candidate(
            &output.records,
            &base,
            output.outliers(),
            Some(Instant::now()),
        );
        assert!(matches!(scan, Scan::OutOfTime));
        assert!(matches!(
            fixture
                .optimizer()
                .best_candidate(&output.records, &base, output.outliers(), None),
            Scan::Found(_)
        ));
    }

    #[test]
    fn config_is_validated() {
        assert!(LocalRecodingConfig::default().validate().is_ok());
        let bad = LocalRecodingConfig {
            target_outlier_fraction: 1.5,
            ..LocalRecodingConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
