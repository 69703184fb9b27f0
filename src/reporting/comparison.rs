use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::reporting::summary::PeriodSummary;

/// Relative change from `previous` to `current`, in percent.
///
/// A zero baseline yields 100 when anything appeared and 0 otherwise.
pub fn percent_change(current: Decimal, previous: Decimal) -> Decimal {
    if previous.is_zero() {
        return if current > Decimal::ZERO {
            dec!(100)
        } else {
            Decimal::ZERO
        };
    }
    ((current - previous) / previous * dec!(100)).round_dp(2)
}

/// Per-metric change between two periods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodComparison {
    pub current: PeriodSummary,
    pub previous: PeriodSummary,
    pub total_variances_change: Decimal,
    pub positive_variances_change: Decimal,
    pub negative_variances_change: Decimal,
    pub total_penalty_amount_change: Decimal,
    pub average_variance_percentage_change: Decimal,
}

impl PeriodComparison {
    pub fn between(current: PeriodSummary, previous: PeriodSummary) -> Self {
        let count = |n: u64| Decimal::from(n);
        Self {
            total_variances_change: percent_change(
                count(current.total_variances),
                count(previous.total_variances),
            ),
            positive_variances_change: percent_change(
                count(current.positive_variances),
                count(previous.positive_variances),
            ),
            negative_variances_change: percent_change(
                count(current.negative_variances),
                count(previous.negative_variances),
            ),
            total_penalty_amount_change: percent_change(
                current.total_penalty_amount,
                previous.total_penalty_amount,
            ),
            average_variance_percentage_change: percent_change(
                current.average_variance_percentage,
                previous.average_variance_percentage,
            ),
            current,
            previous,
        }
    }
}
