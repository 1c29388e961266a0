//! (ε,δ)-differential privacy through sampling and generalization (SafePub).
//!
//! Every record is sampled with probability `β = 1 − e^{−ε}` (from a
//! seeded RNG, so runs are reproducible), the generalization scheme is
//! fixed without looking at the data and the sample is k-anonymized with
//! suppression, where `k` is the smallest value whose failure probability
//! `δ(k)` does not exceed `δ`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::criteria::{check_range, ClassContext, LevelMap, PrivacyCriterion};
use crate::data::encoding::DataManager;
use crate::data::DataSubset;
use crate::error::ConfigError;
use crate::groupify::EquivalenceClass;

const MAX_K: u32 = 100_000;
const MAX_SAMPLE_SIZE: u64 = 10_000_000;

/// Data-independent generalization scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpGeneralization {
    /// Explicit level per quasi-identifier (missing attributes stay at 0).
    Levels(LevelMap),
    /// Fraction in `[0, 1]` of every attribute's maximum level, rounded.
    Degree(f64),
}

/// Resolved (ε,δ)-differential privacy model.
#[derive(Debug, Clone, PartialEq)]
pub struct EdDifferentialPrivacy {
    epsilon: f64,
    delta: f64,
    beta: f64,
    k: u32,
    levels: Vec<u32>,
}

impl EdDifferentialPrivacy {
    pub(crate) fn new(
        epsilon: f64,
        delta: f64,
        generalization: &DpGeneralization,
        manager: &DataManager,
    ) -> Result<Self, ConfigError> {
        const MODEL: &str = "ed-differential-privacy";
        check_range(MODEL, "epsilon", epsilon, |e| e > 0.0, "positive")?;
        check_range(MODEL, "delta", delta, |d| d > 0.0 && d < 1.0, "in (0, 1)")?;

        let beta = sampling_probability(epsilon);
        let k = derive_k(epsilon, delta).ok_or_else(|| ConfigError::InvalidParameter {
            model: MODEL,
            reason: format!("no k up to {MAX_K} reaches delta {delta} with epsilon {epsilon}"),
        })?;
        let levels = resolve_levels(generalization, manager)?;

        tracing::debug!(epsilon, delta, beta, k, ?levels, "differential privacy resolved");
        Ok(Self {
            epsilon,
            delta,
            beta,
            k,
            levels,
        })
    }

    /// Derived minimum class size.
    #[must_use]
    pub const fn k(&self) -> u32 {
        self.k
    }

    /// Sampling probability.
    #[must_use]
    pub const fn beta(&self) -> f64 {
        self.beta
    }

    /// Privacy budget.
    #[must_use]
    pub const fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Failure probability.
    #[must_use]
    pub const fn delta(&self) -> f64 {
        self.delta
    }

    /// Fixed generalization levels, in quasi-identifier order.
    #[must_use]
    pub fn levels(&self) -> &[u32] {
        &self.levels
    }
}

impl PrivacyCriterion for EdDifferentialPrivacy {
    fn name(&self) -> &'static str {
        "ed-differential-privacy"
    }

    fn is_monotonic(&self, _suppression: bool) -> bool {
        true
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, _ctx: &ClassContext<'_>) -> bool {
        class.count >= self.k
    }
}

fn resolve_levels(
    generalization: &DpGeneralization,
    manager: &DataManager,
) -> Result<Vec<u32>, ConfigError> {
    let qis = manager.qis();
    match generalization {
        DpGeneralization::Degree(degree) => {
            check_range(
                "ed-differential-privacy",
                "degree",
                *degree,
                |d| (0.0..=1.0).contains(&d),
                "in [0, 1]",
            )?;
            Ok(qis
                .iter()
                .map(|qi| (degree * f64::from(qi.max_level())).round() as u32)
                .collect())
        }
        DpGeneralization::Levels(map) => {
            for name in map.keys() {
                if manager.qi_index(name).is_none() {
                    return Err(ConfigError::UnknownAttribute(name.clone()));
                }
            }
            qis.iter()
                .map(|qi| {
                    let level = map.get(&qi.name).copied().unwrap_or(0);
                    if level > qi.max_level() {
                        Err(ConfigError::InvalidLevelBounds {
                            attribute: qi.name.clone(),
                            min: level,
                            max: level,
                            height: qi.height(),
                        })
                    } else {
                        Ok(level)
                    }
                })
                .collect()
        }
    }
}

/// `β = 1 − e^{−ε}`.
#[must_use]
pub fn sampling_probability(epsilon: f64) -> f64 {
    1.0 - (-epsilon).exp()
}

/// Bernoulli sample of `num_rows` rows with probability `beta`.
#[must_use]
pub fn sample(num_rows: usize, beta: f64, seed: u64) -> DataSubset {
    let mut rng = StdRng::seed_from_u64(seed);
    let p = if beta.is_finite() { beta.clamp(0.0, 1.0) } else { 0.0 };
    DataSubset::from_rows((0..num_rows).filter(|_| rng.gen_bool(p)))
}

/// Smallest `k` with `δ(k) ≤ δ`, if any up to an internal cap.
#[must_use]
pub fn derive_k(epsilon: f64, delta: f64) -> Option<u32> {
    let beta = sampling_probability(epsilon);
    (1..=MAX_K).find(|k| failure_probability(*k, epsilon, beta) <= delta)
}

/// `δ(k) = max_{n ≥ n_m} A(n)`, evaluated until `A` can no longer exceed
/// the Chernoff bound `C(n)`.
#[must_use]
pub fn failure_probability(k: u32, epsilon: f64, beta: f64) -> f64 {
    let gamma = gamma(epsilon, beta);
    let start = (f64::from(k) / gamma - 1.0).ceil().max(0.0) as u64;
    let mut delta = 0.0_f64;
    let mut n = start;
    loop {
        delta = delta.max(binomial_tail(n, gamma, beta));
        let bound = chernoff_bound(n, gamma, beta);
        if delta >= bound || n - start > MAX_SAMPLE_SIZE {
            return delta;
        }
        n += 1;
    }
}

/// `γ = (e^ε − 1 + β) / e^ε`.
fn gamma(epsilon: f64, beta: f64) -> f64 {
    let power = epsilon.exp();
    (power - 1.0 + beta) / power
}

/// `C(n) = exp(−n (γ ln(γ/β) − (γ − β)))`.
fn chernoff_bound(n: u64, gamma: f64, beta: f64) -> f64 {
    (-(n as f64) * (gamma * (gamma / beta).ln() - (gamma - beta))).exp()
}

/// `A(n) = P[Bin(n, β) > ⌊nγ⌋]`.
fn binomial_tail(n: u64, gamma: f64, beta: f64) -> f64 {
    let first = (n as f64 * gamma).floor() as u64 + 1;
    if first > n {
        return 0.0;
    }
    let ratio = beta / (1.0 - beta);
    let nf = n as f64;
    let jf = first as f64;
    let mut pmf = (ln_gamma(nf + 1.0) - ln_gamma(jf + 1.0) - ln_gamma(nf - jf + 1.0)
        + jf * beta.ln()
        + (nf - jf) * (1.0 - beta).ln())
    .exp();
    let mut sum = pmf;
    for j in first..n {
        pmf *= (n - j) as f64 / (j + 1) as f64 * ratio;
        sum += pmf;
    }
    sum.min(1.0)
}

/// Lanczos approximation of `ln Γ(x)`.
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = COEFFICIENTS[0];
    for (i, c) in COEFFICIENTS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    let t = x + G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}
