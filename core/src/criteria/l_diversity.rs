//! l-diversity variants.
//!
//! All three read the histogram of one sensitive attribute per class.
//! Distinct-l is monotonic in every setting; the entropy and recursive
//! variants are monotonic only while no class can be suppressed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::criteria::{check_range, ClassContext, PrivacyCriterion};
use crate::error::ConfigError;
use crate::groupify::{Distribution, EquivalenceClass, Requirements};

// Una classe uniforme su esattamente l valori deve passare: la somma di
// -p ln p può cadere qualche ulp sotto ln l.
const ENTROPY_TOLERANCE: f64 = 1e-10;

/// `H ≥ ln l`, up to [`ENTROPY_TOLERANCE`].
fn meets_entropy(entropy: f64, threshold: f64) -> bool {
    entropy + ENTROPY_TOLERANCE >= threshold
}

/// At least `l` distinct sensitive values per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistinctLDiversity {
    sensitive: usize,
    l: u32,
}

impl DistinctLDiversity {
    /// `l` must be at least 2.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] for `l < 2`.
    pub fn new(sensitive: usize, l: u32) -> Result<Self, ConfigError> {
        if l < 2 {
            return Err(ConfigError::InvalidParameter {
                model: "distinct-l-diversity",
                reason: format!("l must be at least 2, got {l}"),
            });
        }
        Ok(Self { sensitive, l })
    }
}

impl PrivacyCriterion for DistinctLDiversity {
    fn name(&self) -> &'static str {
        "distinct-l-diversity"
    }

    fn is_monotonic(&self, _suppression: bool) -> bool {
        true
    }

    fn requirements(&self, requirements: &mut Requirements) {
        requirements.require_distribution(self.sensitive);
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        ctx.distribution(class, self.sensitive)
            .is_some_and(|d| d.distinct() >= self.l as usize)
    }
}

/// Entropy estimator used by [`EntropyLDiversity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyEstimator {
    /// Plug-in estimator `-Σ p ln p`.
    #[default]
    Shannon,
    /// Grassberger's bias-corrected estimator.
    Grassberger,
}

impl fmt::Display for EntropyEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shannon => write!(f, "shannon"),
            Self::Grassberger => write!(f, "grassberger"),
        }
    }
}

impl EntropyEstimator {
    /// Entropy (natural logarithm) of a histogram.
    #[must_use]
    pub fn entropy(self, distribution: &Distribution) -> f64 {
        let total = distribution.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        match self {
            Self::Shannon => distribution
                .entries()
                .iter()
                .map(|(_, f)| {
                    let p = f64::from(*f) / total;
                    -p * p.ln()
                })
                .sum(),
            Self::Grassberger => {
                let weighted: f64 = distribution
                    .entries()
                    .iter()
                    .map(|(_, f)| f64::from(*f) * grassberger_g(f64::from(*f)))
                    .sum();
                total.ln() - weighted / total
            }
        }
    }
}

/// `G(n) = ψ(n) + ½ (-1)^n (ψ((n+1)/2) - ψ(n/2))`.
fn grassberger_g(n: f64) -> f64 {
    let sign = if (n as u64) % 2 == 0 { 1.0 } else { -1.0 };
    digamma(n) + 0.5 * sign * (digamma((n + 1.0) / 2.0) - digamma(n / 2.0))
}

/// Digamma function for positive arguments (recurrence + asymptotic series).
pub(crate) fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}

/// Class entropy at least `ln l`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropyLDiversity {
    sensitive: usize,
    l: f64,
    threshold: f64,
    estimator: EntropyEstimator,
}

impl EntropyLDiversity {
    /// `l` must be greater than 1 (`ln 1 = 0` is always met).
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] for `l ≤ 1` or a non-finite `l`.
    pub fn new(sensitive: usize, l: f64, estimator: EntropyEstimator) -> Result<Self, ConfigError> {
        check_range("entropy-l-diversity", "l", l, |l| l > 1.0, "greater than 1")?;
        Ok(Self {
            sensitive,
            l,
            threshold: l.ln(),
            estimator,
        })
    }

    /// Estimator, part of the model identity.
    #[must_use]
    pub const fn estimator(&self) -> EntropyEstimator {
        self.estimator
    }

    /// Diversity parameter.
    #[must_use]
    pub const fn l(&self) -> f64 {
        self.l
    }
}

impl PrivacyCriterion for EntropyLDiversity {
    fn name(&self) -> &'static str {
        "entropy-l-diversity"
    }

    fn is_monotonic(&self, suppression: bool) -> bool {
        !suppression
    }

    fn requirements(&self, requirements: &mut Requirements) {
        requirements.require_distribution(self.sensitive);
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        ctx.distribution(class, self.sensitive)
            .is_some_and(|d| meets_entropy(self.estimator.entropy(d), self.threshold))
    }
}

/// Recursive (c,l)-diversity: `r₁ < c · (r_l + … + r_m)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecursiveClDiversity {
    sensitive: usize,
    c: f64,
    l: u32,
}

impl RecursiveClDiversity {
    /// `c > 0`, `l ≥ 2`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] outside these bounds.
    pub fn new(sensitive: usize, c: f64, l: u32) -> Result<Self, ConfigError> {
        check_range("recursive-cl-diversity", "c", c, |c| c > 0.0, "positive")?;
        if l < 2 {
            return Err(ConfigError::InvalidParameter {
                model: "recursive-cl-diversity",
                reason: format!("l must be at least 2, got {l}"),
            });
        }
        Ok(Self { sensitive, c, l })
    }
}

impl PrivacyCriterion for RecursiveClDiversity {
    fn name(&self) -> &'static str {
        "recursive-cl-diversity"
    }

    fn is_monotonic(&self, suppression: bool) -> bool {
        !suppression
    }

    fn requirements(&self, requirements: &mut Requirements) {
        requirements.require_distribution(self.sensitive);
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, ctx: &ClassContext<'_>) -> bool {
        let Some(distribution) = ctx.distribution(class, self.sensitive) else {
            return false;
        };
        let frequencies = distribution.frequencies_desc();
        let l = self.l as usize;
        if frequencies.len() < l {
            return false;
        }
        let tail: f64 = frequencies[l - 1..].iter().map(|f| f64::from(*f)).sum();
        f64::from(frequencies[0]) < self.c * tail
    }
}
