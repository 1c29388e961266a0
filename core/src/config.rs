//! Configuration of one `anonymize()` call.
//!
//! La configurazione si costruisce in codice oppure da un file YAML; le
//! variabili d'ambiente `DEIDENT_*` sovrascrivono i valori del file, come
//! nei nodi: prima il file, poi l'ambiente, infine la validazione.
//!
//! Recognised variables:
//!
//! - `DEIDENT_SUPPRESSION_LIMIT`: fraction in `[0, 1)`;
//! - `DEIDENT_PRACTICAL_MONOTONICITY`: loose boolean (`1`, `true`, `yes`, `on`);
//! - `DEIDENT_PARALLEL`: loose boolean;
//! - `DEIDENT_HEURISTIC_STEP_LIMIT`: positive integer;
//! - `DEIDENT_HEURISTIC_SEED`: integer.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::algorithm::SearchConfig;
use crate::criteria::PrivacyModel;
use crate::error::ConfigError;
use crate::groupify::HistoryConfig;
use crate::metric::MetricConfig;

/// Generalization bounds of one quasi-identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelBounds {
    /// Lowest level searched.
    pub min: u32,
    /// Highest level searched; `None` means the top of the hierarchy.
    pub max: Option<u32>,
}

/// Everything `anonymize()` needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizationConfig {
    /// Maximum fraction of suppressed records, in `[0, 1)`.
    pub suppression_limit: f64,
    /// Privacy models; all of them must hold.
    pub models: Vec<PrivacyModel>,
    /// Information-loss metric.
    pub metric: MetricConfig,
    /// Propagate anonymity as if every model were monotonic.
    pub practical_monotonicity: bool,
    /// Strategy and budgets.
    pub search: SearchConfig,
    /// History cache budget.
    pub history: HistoryConfig,
    /// Per-attribute generalization bounds.
    pub level_bounds: BTreeMap<String, LevelBounds>,
    /// Maximum number of nodes materialized by lattice views.
    pub max_view_nodes: u64,
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self {
            suppression_limit: 0.0,
            models: Vec::new(),
            metric: MetricConfig::default(),
            practical_monotonicity: false,
            search: SearchConfig::default(),
            history: HistoryConfig::default(),
            level_bounds: BTreeMap::new(),
            max_view_nodes: 100_000,
        }
    }
}

impl AnonymizationConfig {
    /// Configuration with a single model and no suppression.
    #[must_use]
    pub fn with_model(model: PrivacyModel) -> Self {
        Self {
            models: vec![model],
            ..Self::default()
        }
    }

    /// Adds a model.
    #[must_use]
    pub fn and_model(mut self, model: PrivacyModel) -> Self {
        self.models.push(model);
        self
    }

    /// Sets the suppression limit.
    #[must_use]
    pub const fn with_suppression_limit(mut self, limit: f64) -> Self {
        self.suppression_limit = limit;
        self
    }

    /// Loads a YAML file, applies `DEIDENT_*` overrides and validates.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, if an override variable
    /// holds an invalid value, or if [`AnonymizationConfig::validate`] rejects
    /// the result.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut cfg = Self::from_yaml_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses YAML text; no environment overrides, no validation.
    ///
    /// # Errors
    ///
    /// Fails on malformed YAML or unknown variants.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(raw).context("invalid anonymization config YAML")?;
        Ok(cfg)
    }

    /// Overrides fields from `DEIDENT_*` variables.
    ///
    /// # Errors
    ///
    /// Fails if a set variable cannot be parsed for its field.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(raw) = first_env(&["DEIDENT_SUPPRESSION_LIMIT"]) {
            self.suppression_limit = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for suppression limit: {raw}"))?;
        }

        if let Some(raw) = first_env(&["DEIDENT_PRACTICAL_MONOTONICITY"]) {
            self.practical_monotonicity = parse_bool(&raw);
        }

        if let Some(raw) = first_env(&["DEIDENT_PARALLEL"]) {
            self.search.parallel = parse_bool(&raw);
        }

        if let Some(raw) = first_env(&["DEIDENT_HEURISTIC_STEP_LIMIT"]) {
            let value: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for heuristic step limit: {raw}"))?;
            if value == 0 {
                return Err(anyhow::anyhow!("heuristic step limit must be > 0, got {value}"));
            }
            self.search.heuristic.step_limit = value;
        }

        if let Some(raw) = first_env(&["DEIDENT_HEURISTIC_SEED"]) {
            self.search.heuristic.seed = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for heuristic seed: {raw}"))?;
        }

        Ok(())
    }

    /// Checks the parameters that do not depend on the data.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.suppression_limit) {
            return Err(ConfigError::SuppressionLimit(self.suppression_limit));
        }
        if self.models.is_empty() {
            return Err(ConfigError::NoPrivacyModel);
        }
        self.search.heuristic.validate()?;
        self.history.validate()?;
        if self.max_view_nodes == 0 {
            return Err(ConfigError::InvalidBudget(
                "max_view_nodes must be > 0".to_string(),
            ));
        }
        for (attribute, bounds) in &self.level_bounds {
            if let Some(max) = bounds.max {
                if bounds.min > max {
                    return Err(ConfigError::InvalidLevelBounds {
                        attribute: attribute.clone(),
                        min: bounds.min,
                        max,
                        height: 0,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Returns the first defined environment variable from the given list.
fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok())
}

/// Loose boolean: `1`, `true`, `yes`, `on` (any case); anything else is `false`.
fn parse_bool(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::algorithm::SearchAlgorithm;
    use crate::metric::MetricKind;

    // le variabili d'ambiente sono globali al processo
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn reset_env() {
        let keys = [
            "DEIDENT_SUPPRESSION_LIMIT",
            "DEIDENT_PRACTICAL_MONOTONICITY",
            "DEIDENT_PARALLEL",
            "DEIDENT_HEURISTIC_STEP_LIMIT",
            "DEIDENT_HEURISTIC_SEED",
        ];
        for key in keys {
            env::remove_var(key);
        }
    }

    const YAML: &str = r"
suppression_limit: 0.1
models:
  - type: k_anonymity
    k: 3
  - type: distinct_l_diversity
    attribute: disease
    l: 2
metric:
  kind: loss
search:
  algorithm: lightning
  heuristic:
    step_limit: 50
level_bounds:
  age:
    min: 1
    max: 2
";

    #[test]
    fn yaml_round_trip_of_the_main_fields() {
        let cfg = AnonymizationConfig::from_yaml_str(YAML).expect("yaml");
        assert!((cfg.suppression_limit - 0.1).abs() < f64::EPSILON);
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.models[0], PrivacyModel::KAnonymity { k: 3 });
        assert_eq!(cfg.metric.kind, MetricKind::Loss);
        assert_eq!(cfg.search.algorithm, SearchAlgorithm::Lightning);
        assert_eq!(cfg.search.heuristic.step_limit, 50);
        // campi assenti: default
        assert_eq!(cfg.search.heuristic.population_size, 32);
        assert_eq!(cfg.max_view_nodes, 100_000);
        assert_eq!(
            cfg.level_bounds.get("age"),
            Some(&LevelBounds { min: 1, max: Some(2) })
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = AnonymizationConfig::with_model(PrivacyModel::KAnonymity { k: 2 });
        assert!(base.validate().is_ok());

        assert_eq!(
            base.clone().with_suppression_limit(1.0).validate(),
            Err(ConfigError::SuppressionLimit(1.0))
        );
        assert_eq!(
            AnonymizationConfig::default().validate(),
            Err(ConfigError::NoPrivacyModel)
        );

        let mut inverted = base.clone();
        inverted
            .level_bounds
            .insert("age".into(), LevelBounds { min: 3, max: Some(1) });
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidLevelBounds { .. })
        ));

        let mut no_view = base;
        no_view.max_view_nodes = 0;
        assert!(matches!(
            no_view.validate(),
            Err(ConfigError::InvalidBudget(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        reset_env();
        env::set_var("DEIDENT_SUPPRESSION_LIMIT", "0.25");
        env::set_var("DEIDENT_PARALLEL", "yes");
        env::set_var("DEIDENT_HEURISTIC_SEED", "42");

        let mut cfg = AnonymizationConfig::from_yaml_str(YAML).expect("yaml");
        cfg.apply_env_overrides().expect("env");
        reset_env();

        assert!((cfg.suppression_limit - 0.25).abs() < f64::EPSILON);
        assert!(cfg.search.parallel);
        assert_eq!(cfg.search.heuristic.seed, 42);
        assert!(!cfg.practical_monotonicity);
    }

    #[test]
    fn invalid_env_values_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        reset_env();
        env::set_var("DEIDENT_HEURISTIC_STEP_LIMIT", "0");
        let mut cfg = AnonymizationConfig::default();
        assert!(cfg.apply_env_overrides().is_err());

        reset_env();
        env::set_var("DEIDENT_SUPPRESSION_LIMIT", "not-a-number");
        assert!(cfg.apply_env_overrides().is_err());
        reset_env();
    }

    #[test]
    fn from_yaml_reads_and_validates_a_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        reset_env();
        let path = env::temp_dir().join(format!("deident-config-{}.yaml", std::process::id()));
        fs::write(&path, YAML).expect("write");
        let cfg = AnonymizationConfig::from_yaml(&path).expect("config");
        fs::remove_file(&path).ok();
        assert_eq!(cfg.models.len(), 2);

        let missing = env::temp_dir().join("deident-config-missing.yaml");
        assert!(AnonymizationConfig::from_yaml(&missing).is_err());
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(parse_bool(" on "));
        assert!(!parse_bool("off"));
        assert!(!parse_bool("maybe"));
    }
}
