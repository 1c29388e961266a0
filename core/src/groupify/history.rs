//! Snapshot history.
//!
//! Keeps the equivalence classes of recently checked transformations so
//! that later checks can coarsen them instead of scanning the dataset.
//! Small snapshots only: a grouping is kept when it is both a small fraction
//! of the dataset and noticeably smaller than what it was derived from.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::groupify::Groupify;
use crate::lattice::Transformation;

/// Budget of the history cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of snapshots kept (LRU beyond that).
    pub max_entries: usize,
    /// A snapshot is kept only if `classes ≤ max_dataset_fraction · rows`.
    pub max_dataset_fraction: f64,
    /// A snapshot is kept only if `classes ≤ max_snapshot_fraction · source`,
    /// where `source` is the size of what it was derived from.
    pub max_snapshot_fraction: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_dataset_fraction: 0.2,
            max_snapshot_fraction: 0.8,
        }
    }
}

impl HistoryConfig {
    /// Rejects fractions outside `[0, 1]`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBudget`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_dataset_fraction", self.max_dataset_fraction),
            ("max_snapshot_fraction", self.max_snapshot_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidBudget(format!(
                    "history.{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Entry {
    snapshot: Arc<Groupify>,
    last_used: u64,
}

/// LRU map from transformation to equivalence classes.
#[derive(Debug)]
pub struct HistoryCache {
    config: HistoryConfig,
    entries: HashMap<Transformation, Entry>,
    tick: u64,
    epoch: u64,
    fingerprint: u64,
}

impl HistoryCache {
    /// Empty cache.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            tick: 0,
            epoch: 0,
            fingerprint: 0,
        }
    }

    /// Current budget.
    #[must_use]
    pub const fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Replaces the budget; existing entries beyond the new size are evicted.
    pub fn set_config(&mut self, config: HistoryConfig) {
        self.config = config;
        while self.entries.len() > self.config.max_entries {
            self.evict();
        }
    }

    /// Drops every snapshot if the cache was built for another source epoch
    /// or another encoding. Returns `true` if the cache was cleared.
    pub fn ensure_epoch(&mut self, epoch: u64, fingerprint: u64) -> bool {
        if self.epoch == epoch && self.fingerprint == fingerprint {
            return false;
        }
        let dropped = self.entries.len();
        self.entries.clear();
        self.epoch = epoch;
        self.fingerprint = fingerprint;
        if dropped > 0 {
            tracing::debug!(dropped, epoch, "history cache invalidated");
        }
        true
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every snapshot.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stored snapshot of `t` or of a predecessor of `t` with the fewest
    /// classes. Ties go to the lexicographically smallest transformation.
    pub fn best_ancestor(&mut self, t: &Transformation) -> Option<Arc<Groupify>> {
        let best = self
            .entries
            .iter()
            .filter(|(key, _)| key.is_generalized_by(t))
            .min_by(|a, b| {
                a.1.snapshot
                    .len()
                    .cmp(&b.1.snapshot.len())
                    .then_with(|| a.0.cmp(b.0))
            })
            .map(|(key, _)| key.clone())?;

        self.tick = self.tick.saturating_add(1);
        let tick = self.tick;
        self.entries.get_mut(&best).map(|entry| {
            entry.last_used = tick;
            Arc::clone(&entry.snapshot)
        })
    }

    /// Stores `snapshot` if it fits the budget. `rows` is the dataset size,
    /// `derived_from` the size of the grouping (or dataset) it was built
    /// from. Existing keys are never overwritten.
    pub fn store(&mut self, snapshot: Arc<Groupify>, derived_from: usize, rows: usize) -> bool {
        if self.config.max_entries == 0 {
            return false;
        }
        let key = snapshot.transformation();
        if self.entries.contains_key(key) {
            return false;
        }
        let classes = snapshot.len() as f64;
        if classes > self.config.max_dataset_fraction * rows as f64
            || classes > self.config.max_snapshot_fraction * derived_from as f64
        {
            return false;
        }

        while self.entries.len() >= self.config.max_entries {
            self.evict();
        }
        self.tick = self.tick.saturating_add(1);
        self.entries.insert(
            key.clone(),
            Entry {
                snapshot,
                last_used: self.tick,
            },
        );
        true
    }

    fn evict(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encoding::DataManager;
    use crate::groupify::tests::example_data;
    use crate::groupify::Requirements;

    fn snapshot(manager: &DataManager, levels: &[u32]) -> Arc<Groupify> {
        Arc::new(Groupify::build(
            manager,
            &Transformation::new(levels.to_vec()),
            &Requirements::default(),
        ))
    }

    fn permissive() -> HistoryConfig {
        HistoryConfig {
            max_entries: 2,
            max_dataset_fraction: 1.0,
            max_snapshot_fraction: 1.0,
        }
    }

    #[test]
    fn best_ancestor_prefers_fewest_classes() {
        let manager = DataManager::new(&example_data(), None).expect("manager");
        let mut cache = HistoryCache::new(HistoryConfig {
            max_entries: 10,
            ..permissive()
        });
        assert!(cache.store(snapshot(&manager, &[0, 0, 0]), 7, 7));
        assert!(cache.store(snapshot(&manager, &[1, 1, 0]), 7, 7));

        let best = cache
            .best_ancestor(&Transformation::new(vec![1, 1, 2]))
            .expect("ancestor");
        assert_eq!(best.transformation().levels(), &[1, 1, 0]);
        assert!(cache
            .best_ancestor(&Transformation::new(vec![0, 1, 5]))
            .is_some_and(|g| g.transformation().levels() == [0, 0, 0]));
    }

    #[test]
    fn store_respects_fraction_limits() {
        let manager = DataManager::new(&example_data(), None).expect("manager");
        let mut cache = HistoryCache::default();
        // 7 classes over 7 rows: well above 20% of the dataset
        assert!(!cache.store(snapshot(&manager, &[0, 0, 0]), 7, 7));
        // 1 class: small enough
        assert!(cache.store(snapshot(&manager, &[2, 1, 5]), 7, 7));
        assert!(!cache.store(snapshot(&manager, &[2, 1, 5]), 7, 7));
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let manager = DataManager::new(&example_data(), None).expect("manager");
        let mut cache = HistoryCache::new(permissive());
        cache.store(snapshot(&manager, &[0, 0, 0]), 7, 7);
        cache.store(snapshot(&manager, &[0, 1, 0]), 7, 7);
        // touch [0,0,0] so that [0,1,0] becomes the oldest
        cache.best_ancestor(&Transformation::new(vec![0, 0, 1]));
        cache.store(snapshot(&manager, &[1, 0, 0]), 7, 7);

        assert_eq!(cache.len(), 2);
        assert!(cache
            .best_ancestor(&Transformation::new(vec![0, 1, 0]))
            .is_some_and(|g| g.transformation().levels() == [0, 0, 0]));
    }

    #[test]
    fn epoch_change_clears() {
        let manager = DataManager::new(&example_data(), None).expect("manager");
        let mut cache = HistoryCache::new(permissive());
        cache.ensure_epoch(1, manager.fingerprint());
        cache.store(snapshot(&manager, &[0, 0, 0]), 7, 7);
        assert!(!cache.ensure_epoch(1, manager.fingerprint()));
        assert_eq!(cache.len(), 1);
        assert!(cache.ensure_epoch(2, manager.fingerprint()));
        assert!(cache.is_empty());
    }
}
