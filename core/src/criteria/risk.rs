use crate::criteria::{check_range, PrivacyCriterion, SampleSummary};
use crate::error::ConfigError;

/// Average prosecutor re-identification risk of the released records,
/// `#classes / #records`, is at most `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageReidentificationRisk {
    threshold: f64,
}

impl AverageReidentificationRisk {
    /// `threshold` in `(0, 1)`; a threshold of 1 is always met.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidParameter`] outside `(0, 1)`.
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        check_range(
            "average-reidentification-risk",
            "threshold",
            threshold,
            |t| t > 0.0 && t < 1.0,
            "in (0, 1)",
        )?;
        Ok(Self { threshold })
    }
}

impl PrivacyCriterion for AverageReidentificationRisk {
    fn name(&self) -> &'static str {
        "average-reidentification-risk"
    }

    fn is_monotonic(&self, suppression: bool) -> bool {
        !suppression
    }

    fn is_sample_anonymous(&self, summary: &SampleSummary) -> bool {
        summary.records > 0
            && summary.classes as f64 / summary.records as f64 <= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_is_classes_over_records() {
        let model = AverageReidentificationRisk::new(0.5).expect("model");
        assert!(model.is_sample_anonymous(&SampleSummary {
            classes: 3,
            records: 7
        }));
        assert!(!model.is_sample_anonymous(&SampleSummary {
            classes: 4,
            records: 7
        }));
        assert!(!model.is_sample_anonymous(&SampleSummary::default()));
    }

    #[test]
    fn threshold_range() {
        assert!(AverageReidentificationRisk::new(0.0).is_err());
        assert!(AverageReidentificationRisk::new(1.0).is_err());
    }
}
