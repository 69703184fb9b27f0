use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::reporting::filters::DateWindow;
use crate::reporting::rollup::CollectorPerformanceRollup;
use crate::variance::models::{ApprovalRecord, VarianceType};

/// Headline counts and totals over a set of approvals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub window: Option<DateWindow>,
    pub total_variances: u64,
    pub positive_variances: u64,
    pub negative_variances: u64,
    pub none_variances: u64,
    pub total_penalty_amount: Decimal,
    pub average_variance_percentage: Decimal,
}

impl PeriodSummary {
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a ApprovalRecord>,
        window: Option<DateWindow>,
    ) -> Self {
        let mut summary = Self {
            window,
            ..Default::default()
        };
        let mut percentage_sum = Decimal::ZERO;

        for record in records {
            summary.total_variances += 1;
            match record.variance_type {
                VarianceType::Positive => summary.positive_variances += 1,
                VarianceType::Negative => summary.negative_variances += 1,
                VarianceType::None => summary.none_variances += 1,
            }
            summary.total_penalty_amount += record.penalty_amount;
            percentage_sum += record.variance_percentage;
        }

        if summary.total_variances > 0 {
            summary.average_variance_percentage =
                (percentage_sum / Decimal::from(summary.total_variances)).round_dp(2);
        }
        summary
    }
}

impl fmt::Display for PeriodSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = self
            .window
            .map(|w| w.to_string())
            .unwrap_or_else(|| "all time".to_string());
        write!(
            f,
            "=== Variance Summary ({}) ===\n\
             Variances: {} (+{} / -{} / ={})\n\
             Penalties: {} | Avg Variance: {}%",
            period,
            self.total_variances,
            self.positive_variances,
            self.negative_variances,
            self.none_variances,
            self.total_penalty_amount,
            self.average_variance_percentage,
        )
    }
}

/// Dashboard ratios derived from a summary and its collector rollups.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Share of approvals without a shortfall, in percent.
    pub collection_accuracy: Decimal,
    /// Penalty charged per approval.
    pub penalty_rate: Decimal,
    pub variance_consistency: Decimal,
    /// Mean collector performance score.
    pub collector_efficiency: Decimal,
}

impl PerformanceMetrics {
    pub fn compute(summary: &PeriodSummary, rollups: &[CollectorPerformanceRollup]) -> Self {
        let mut metrics = Self::default();

        if summary.total_variances > 0 {
            let total = Decimal::from(summary.total_variances);
            let accurate = Decimal::from(summary.total_variances - summary.negative_variances);
            metrics.collection_accuracy = (accurate / total * dec!(100)).round_dp(2);
            metrics.penalty_rate = (summary.total_penalty_amount / total).round_dp(2);
            metrics.variance_consistency = summary.average_variance_percentage.round_dp(2);
        }

        if !rollups.is_empty() {
            let sum: Decimal = rollups.iter().map(|r| r.performance_score).sum();
            metrics.collector_efficiency = (sum / Decimal::from(rollups.len() as u64)).round_dp(2);
        }

        metrics
    }
}
