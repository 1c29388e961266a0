//! SearchObserver – contatori della ricerca.
//!
//! Raccoglie, senza bloccare, quante valutazioni sono state fatte e come
//! sono state costruite le classi di equivalenza:
//! - controlli di nodi del reticolo,
//! - hit/miss della cache degli snapshot,
//! - costruzioni incrementali vs. scansioni complete,
//! - nodi scartati per bound sulla perdita.
//!
//! I contatori sono atomici perché i nodi di uno stesso livello possono
//! essere valutati in parallelo.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot dei contatori, pensato per essere serializzato o loggato.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStatistics {
    /// Nodi valutati sui dati.
    pub checks: u64,
    /// Valutazioni che hanno trovato un antenato in cache.
    pub cache_hits: u64,
    /// Valutazioni senza antenato in cache.
    pub cache_misses: u64,
    /// Classi costruite per coarsening di uno snapshot.
    pub incremental_builds: u64,
    /// Classi costruite scandendo tutto il dataset.
    pub full_scans: u64,
    /// Snapshot salvati nella cache.
    pub snapshots_stored: u64,
    /// Nodi scartati perché il lower bound supera l'ottimo corrente.
    pub bound_pruned: u64,
}

/// Osservatore della ricerca.
#[derive(Debug, Default)]
pub struct SearchObserver {
    checks: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    incremental_builds: AtomicU64,
    full_scans: AtomicU64,
    snapshots_stored: AtomicU64,
    bound_pruned: AtomicU64,
}

impl SearchObserver {
    /// Crea un osservatore con tutti i contatori a zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_check(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.incremental_builds.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
            self.full_scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_snapshot_stored(&self) {
        self.snapshots_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bound_pruned(&self, nodes: u64) {
        self.bound_pruned.fetch_add(nodes, Ordering::Relaxed);
    }

    /// Numero di nodi valutati finora.
    #[must_use]
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    /// Fotografia coerente (per singolo contatore) dello stato attuale.
    #[must_use]
    pub fn snapshot(&self) -> SearchStatistics {
        SearchStatistics {
            checks: self.checks.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            incremental_builds: self.incremental_builds.load(Ordering::Relaxed),
            full_scans: self.full_scans.load(Ordering::Relaxed),
            snapshots_stored: self.snapshots_stored.load(Ordering::Relaxed),
            bound_pruned: self.bound_pruned.load(Ordering::Relaxed),
        }
    }

    /// Azzera tutti i contatori.
    pub fn reset(&self) {
        for counter in [
            &self.checks,
            &self.cache_hits,
            &self.cache_misses,
            &self.incremental_builds,
            &self.full_scans,
            &self.snapshots_stored,
            &self.bound_pruned,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let observer = SearchObserver::new();
        observer.record_check();
        observer.record_check();
        observer.record_cache(true);
        observer.record_cache(false);
        observer.record_bound_pruned(3);

        let snap = observer.snapshot();
        assert_eq!(snap.checks, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.full_scans, 1);
        assert_eq!(snap.bound_pruned, 3);

        observer.reset();
        assert_eq!(observer.snapshot(), SearchStatistics::default());
    }
}
