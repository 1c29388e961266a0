use crate::criteria::{ClassContext, PrivacyCriterion};
use crate::error::ConfigError;
use crate::groupify::EquivalenceClass;

/// Every released class contains at least `k` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KAnonymity {
    k: u32,
}

impl KAnonymity {
    /// `k` must be in `[2, rows]`: `k = 1` is trivially satisfied and a
    /// `k` above the release size can never be.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] outside that range.
    pub fn new(k: u32, rows: usize) -> Result<Self, ConfigError> {
        if k < 2 || k as usize > rows {
            return Err(ConfigError::InvalidParameter {
                model: "k-anonymity",
                reason: format!("k must be in [2, {rows}], got {k}"),
            });
        }
        Ok(Self { k })
    }

    /// Minimum class size.
    #[must_use]
    pub const fn k(&self) -> u32 {
        self.k
    }
}

impl PrivacyCriterion for KAnonymity {
    fn name(&self) -> &'static str {
        "k-anonymity"
    }

    fn is_monotonic(&self, _suppression: bool) -> bool {
        true
    }

    fn is_class_anonymous(&self, class: &EquivalenceClass, _ctx: &ClassContext<'_>) -> bool {
        class.count >= self.k
    }
}
