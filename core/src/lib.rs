//! deident – motore di ricerca delle trasformazioni per il rilascio di
//! microdati anonimizzati.
//!
//! Il crate riceve una tabella con i ruoli delle colonne e le gerarchie
//! di generalizzazione, un insieme di modelli di privacy e una metrica di
//! perdita di informazione; esplora il reticolo delle generalizzazioni e
//! restituisce la trasformazione migliore che soddisfa tutti i modelli.
//!
//! - codifica intera dei dati e delle gerarchie (`data`),
//! - reticolo e spazio delle soluzioni con propagazione (`lattice`),
//! - classi di equivalenza con cache degli snapshot (`groupify`),
//! - modelli di privacy (`criteria`) e metriche (`metric`),
//! - strategie Flash / Lightning / Genetic (`algorithm`),
//! - handle di output e ricodifica locale (`handle`, `recoding`).
//!
//! # Panoramica
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          Anonymizer          │
//! │ ┌──────────────────────────┐ │
//! │ │  DataManager             │ │  codifica + sottoinsieme di rilascio
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │  ModelSet + Metric       │ │  criteri risolti, perdita
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │  SearchStrategy          │ │  Flash / Lightning / Genetic
//! │ │   └ NodeChecker          │ │  groupify + HistoryCache
//! │ └──────────────────────────┘ │
//! │ ┌──────────────────────────┐ │
//! │ │  AnonymizationResult     │ │  ottimo, viste, OutputHandle
//! │ └──────────────────────────┘ │
//! └──────────────────────────────┘
//! ```
//!
//! Un [`Anonymizer`] può essere riusato: la cache degli snapshot resta
//! valida finché la sorgente non cambia epoca.

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info};

/// Modulo con tabella sorgente, ruoli degli attributi e gerarchie.
pub mod data;
/// Modulo con il reticolo delle generalizzazioni e lo spazio delle soluzioni.
pub mod lattice;
/// Modulo che costruisce le classi di equivalenza (con cache degli snapshot).
pub mod groupify;
/// Modulo con i modelli di privacy.
pub mod criteria;
/// Modulo con le metriche di perdita di informazione.
pub mod metric;
/// Modulo che valuta un singolo nodo del reticolo.
pub(crate) mod checker;
/// Modulo con le strategie di ricerca.
pub mod algorithm;
/// Modulo con i contatori della ricerca.
pub mod observer;
/// Modulo con gli handle di output e il ciclo di vita della sorgente.
pub mod handle;
/// Modulo per la ricodifica locale dei record soppressi.
pub mod recoding;
/// Modulo con il risultato di una anonimizzazione.
pub mod result;
/// Modulo di configurazione (YAML + ambiente).
pub mod config;
/// Modulo con la tassonomia degli errori.
pub mod error;

pub use algorithm::{HeuristicConfig, SearchAlgorithm, SearchConfig, StepSemantics};
pub use config::{AnonymizationConfig, LevelBounds};
pub use criteria::PrivacyModel;
pub use data::{AttributeType, Data, DataDefinition, DataSubset, Hierarchy, HierarchyBuilder};
pub use error::{AnonymizerError, ConfigError, DataError, HandleError, Result, RollbackRequired};
pub use groupify::HistoryConfig;
pub use handle::{HandleState, OutputHandle, SUPPRESSED};
pub use lattice::{Anonymity, Lattice, LossRange, Propagation, SolutionSpace, Transformation};
pub use metric::{InformationLoss, MetricConfig, MetricKind};
pub use observer::{SearchObserver, SearchStatistics};
pub use recoding::{LocalRecodingConfig, RecodingReport, StopReason};
pub use result::{AnonymizationResult, LatticeNode, LatticeStatistics, LatticeView};

use checker::{cache_fingerprint, NodeChecker};
use config::AnonymizationConfig as Config;
use criteria::ModelSet;
use data::encoding::DataManager;
use groupify::HistoryCache;
use handle::lock_lifecycle;
use metric::Metric;
use result::SearchOutcome;

/// Entry point: runs the transformation search.
///
/// Holds the history cache and the search counters across calls.
#[derive(Debug, Default)]
pub struct Anonymizer {
    history: Mutex<HistoryCache>,
    observer: SearchObserver,
}

impl Anonymizer {
    /// Anonymizer with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of the last search.
    #[must_use]
    pub const fn observer(&self) -> &SearchObserver {
        &self.observer
    }

    /// Searches the lattice of `data` for the best transformation that
    /// satisfies every model of `config`.
    ///
    /// Finding no anonymous transformation is not an error: the result has
    /// no global optimum.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`] for invalid configurations;
    /// - [`DataError`] for unusable data or hierarchies;
    /// - [`HandleError::SourceLocked`] while an output of `data` is alive.
    pub fn anonymize(&self, data: &Data, config: &Config) -> Result<AnonymizationResult> {
        let started = Instant::now();

        // 1) configurazione e stato della sorgente
        config.validate()?;
        let epoch = {
            let lifecycle = lock_lifecycle(data.lifecycle())?;
            if lifecycle.is_locked() {
                return Err(HandleError::SourceLocked.into());
            }
            lifecycle.epoch()
        };

        // 2) codifica, modelli, metrica
        let subset = criteria::release_subset(&config.models, data.num_rows())?;
        let manager = Arc::new(DataManager::new(data, subset.as_ref())?);
        let models = ModelSet::resolve(&config.models, &manager, config.suppression_limit)?;
        let metric = Metric::new(&config.metric, &manager)?;

        // 3) reticolo e propagazione
        let lattice = build_lattice(data, &manager, config, models.fixed_levels())?;
        let propagation = if models.is_monotonic() {
            Propagation::Formal
        } else if config.practical_monotonicity {
            Propagation::Practical
        } else {
            Propagation::None
        };
        let algorithm = config
            .search
            .algorithm
            .resolve(lattice.size(), config.search.heuristic_threshold);
        info!(
            rows = manager.num_rows(),
            release = manager.release_size(),
            qis = manager.qis().len(),
            nodes = lattice.size(),
            models = ?models.names(),
            metric = %metric.kind(),
            %algorithm,
            "starting transformation search"
        );

        // 4) cache e contatori
        {
            let mut history = self
                .history
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            history.set_config(config.history.clone());
            if history.ensure_epoch(epoch, cache_fingerprint(&manager, models.requirements())) {
                debug!(epoch, "history cache reset for a new source state");
            }
        }
        self.observer.reset();

        // 5) ricerca
        let mut space = SolutionSpace::new(lattice, propagation);
        {
            let ctx = algorithm::SearchContext {
                checker: NodeChecker::new(&manager, &models, &metric, &self.history, &self.observer),
                config: &config.search,
                metric_monotonic: metric.is_monotonic(models.suppression()),
            };
            algorithm::run(algorithm, &ctx, &mut space);
        }

        let result = AnonymizationResult::new(SearchOutcome {
            lifecycle: Arc::clone(data.lifecycle()),
            epoch,
            manager,
            models,
            metric,
            space,
            algorithm,
            search: self.observer.snapshot(),
            max_view_nodes: config.max_view_nodes,
            elapsed: started.elapsed(),
        });
        match (result.global_optimum(), result.optimum_loss()) {
            (Some(optimum), Some(loss)) => info!(
                %optimum,
                %loss,
                checked = result.solution_space().checked_count(),
                elapsed_ms = result.elapsed().as_millis(),
                "transformation search finished"
            ),
            _ => info!(
                checked = result.solution_space().checked_count(),
                elapsed_ms = result.elapsed().as_millis(),
                "transformation search finished without an anonymous transformation"
            ),
        }
        Ok(result)
    }
}

/// Lattice bounds: hierarchy heights, narrowed by the configured level
/// bounds, collapsed to the fixed levels of a DP model.
fn build_lattice(
    data: &Data,
    manager: &DataManager,
    config: &Config,
    fixed: Option<&[u32]>,
) -> Result<Lattice> {
    for name in config.level_bounds.keys() {
        if data.column_index(name).is_none() {
            return Err(ConfigError::UnknownAttribute(name.clone()).into());
        }
        let actual = data.definition().attribute_type(name);
        if actual != AttributeType::QuasiIdentifying {
            return Err(ConfigError::AttributeTypeConflict {
                attribute: name.clone(),
                expected: AttributeType::QuasiIdentifying.as_str(),
                actual: actual.as_str(),
            }
            .into());
        }
    }

    let mut min = Vec::with_capacity(manager.qis().len());
    let mut max = Vec::with_capacity(manager.qis().len());
    for (i, qi) in manager.qis().iter().enumerate() {
        let top = qi.max_level();
        let bounds = config.level_bounds.get(&qi.name).copied().unwrap_or_default();
        let (lo, hi) = (bounds.min, bounds.max.unwrap_or(top));
        let invalid = || ConfigError::InvalidLevelBounds {
            attribute: qi.name.clone(),
            min: lo,
            max: hi,
            height: qi.height(),
        };
        if lo > hi || hi > top {
            return Err(invalid().into());
        }
        match fixed.and_then(|levels| levels.get(i)) {
            Some(&level) if level < lo || level > hi => return Err(invalid().into()),
            Some(&level) => {
                min.push(level);
                max.push(level);
            }
            None => {
                min.push(lo);
                max.push(hi);
            }
        }
    }
    Ok(Lattice::new(min, max)?)
}
