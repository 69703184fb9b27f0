use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::reporting::filters::DateWindow;
use crate::variance::models::{ApprovalRecord, VarianceType};

/// Variance activity of one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBucket {
    pub date: NaiveDate,
    pub positive_count: u64,
    pub negative_count: u64,
    /// Mean variance percentage of the day's positive records.
    pub average_positive_variance: Decimal,
    /// Mean magnitude of the day's negative variance percentages.
    pub average_negative_variance: Decimal,
    pub total_penalty_amount: Decimal,
}

#[derive(Default)]
struct DayTotals {
    positive_count: u64,
    positive_sum: Decimal,
    negative_count: u64,
    negative_sum: Decimal,
    penalty: Decimal,
}

impl DayTotals {
    fn finish(self, date: NaiveDate) -> TrendBucket {
        TrendBucket {
            date,
            positive_count: self.positive_count,
            negative_count: self.negative_count,
            average_positive_variance: mean(self.positive_sum, self.positive_count),
            average_negative_variance: mean(self.negative_sum, self.negative_count).abs(),
            total_penalty_amount: self.penalty,
        }
    }
}

fn mean(sum: Decimal, count: u64) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        sum / Decimal::from(count)
    }
}

/// Fold approvals into per-day buckets, ascending by date.
///
/// Records outside `window` are skipped. Input order does not matter.
pub fn bucketize<'a>(
    records: impl IntoIterator<Item = &'a ApprovalRecord>,
    window: Option<&DateWindow>,
) -> Vec<TrendBucket> {
    let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();

    for record in records {
        if window.is_some_and(|w| !w.contains(record.approved_at)) {
            continue;
        }
        let day = days.entry(record.approved_at.date_naive()).or_default();
        match record.variance_type {
            VarianceType::Positive => {
                day.positive_count += 1;
                day.positive_sum += record.variance_percentage;
            }
            VarianceType::Negative => {
                day.negative_count += 1;
                day.negative_sum += record.variance_percentage;
            }
            VarianceType::None => {}
        }
        day.penalty += record.penalty_amount;
    }

    days.into_iter().map(|(date, totals)| totals.finish(date)).collect()
}
