//! Penalty assessment from a configured rate schedule.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ValidationError;
use crate::variance::classifier::VarianceClassification;
use crate::variance::models::VarianceType;

/// One row of the penalty schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PenaltyRule {
    pub variance_type: VarianceType,
    /// Inclusive lower bound on `|variance_percentage|`.
    pub min_variance_percentage: Decimal,
    /// Inclusive upper bound on `|variance_percentage|`.
    pub max_variance_percentage: Decimal,
    pub rate_per_liter: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl PenaltyRule {
    fn matches(&self, variance_type: VarianceType, magnitude: Decimal) -> bool {
        self.active
            && self.variance_type == variance_type
            && magnitude >= self.min_variance_percentage
            && magnitude <= self.max_variance_percentage
    }
}

#[derive(Debug, Clone, Default)]
pub struct PenaltySchedule {
    rules: Vec<PenaltyRule>,
}

impl PenaltySchedule {
    pub fn new(rules: Vec<PenaltyRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PenaltyRule] {
        &self.rules
    }

    /// Penalty owed for a classified variance.
    ///
    /// Uses the first active rule matching the variance type whose band
    /// contains `|variance_percentage|`; the amount is `|variance_liters| * rate`.
    /// Exact matches and unmatched variances carry no penalty.
    pub fn assess(&self, variance: &VarianceClassification) -> Decimal {
        if variance.variance_type == VarianceType::None {
            return Decimal::ZERO;
        }

        let magnitude = variance.variance_percentage.abs();
        match self
            .rules
            .iter()
            .find(|rule| rule.matches(variance.variance_type, magnitude))
        {
            Some(rule) => (variance.variance_liters.abs() * rule.rate_per_liter).max(Decimal::ZERO),
            None => Decimal::ZERO,
        }
    }
}

/// Accept a penalty from an external policy, rejecting negative amounts.
pub fn validate_penalty(amount: Decimal) -> Result<Decimal, ValidationError> {
    if amount < Decimal::ZERO {
        Err(ValidationError::NegativePenalty(amount))
    } else {
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variance::classifier::classify;
    use rust_decimal_macros::dec;

    fn rule(variance_type: VarianceType, min: Decimal, max: Decimal, rate: Decimal) -> PenaltyRule {
        PenaltyRule {
            variance_type,
            min_variance_percentage: min,
            max_variance_percentage: max,
            rate_per_liter: rate,
            active: true,
        }
    }

    fn schedule() -> PenaltySchedule {
        PenaltySchedule::new(vec![
            rule(VarianceType::Negative, dec!(0), dec!(5), dec!(2)),
            rule(VarianceType::Negative, dec!(5.01), dec!(100), dec!(5)),
            rule(VarianceType::Positive, dec!(10), dec!(100), dec!(1)),
        ])
    }

    #[test]
    fn test_small_shortfall_uses_first_band() {
        // 4 liters short of 100 → 4% → band 0..5 at 2/liter
        assert_eq!(schedule().assess(&classify(dec!(100), dec!(96))), dec!(8));
    }

    #[test]
    fn test_large_shortfall_uses_second_band() {
        // 20 liters short of 100 → 20% → 5/liter
        assert_eq!(schedule().assess(&classify(dec!(100), dec!(80))), dec!(100));
    }

    #[test]
    fn test_unmatched_positive_is_free() {
        assert_eq!(schedule().assess(&classify(dec!(100), dec!(103))), Decimal::ZERO);
    }

    #[test]
    fn test_exact_match_is_free() {
        assert_eq!(schedule().assess(&classify(dec!(100), dec!(100))), Decimal::ZERO);
    }

    #[test]
    fn test_inactive_rules_are_skipped() {
        let mut inactive = rule(VarianceType::Negative, dec!(0), dec!(100), dec!(50));
        inactive.active = false;
        let schedule = PenaltySchedule::new(vec![
            inactive,
            rule(VarianceType::Negative, dec!(0), dec!(100), dec!(1)),
        ]);
        assert_eq!(schedule.assess(&classify(dec!(10), dec!(7))), dec!(3));
    }

    #[test]
    fn test_validate_penalty() {
        assert_eq!(validate_penalty(dec!(12.5)), Ok(dec!(12.5)));
        assert_eq!(validate_penalty(Decimal::ZERO), Ok(Decimal::ZERO));
        assert!(validate_penalty(dec!(-0.01)).is_err());
    }
}
