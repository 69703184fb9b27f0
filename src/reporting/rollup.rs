//! Per-collector performance rollups.
//!
//! Views are partitioned by one staff identity, chosen per call with
//! [`GroupingKey`]. Each partition gets counts, totals, a signed average
//! variance and a bounded performance score:
//!
//! ```text
//! accuracy    = 1 - flagged / total            flagged = negative or severe
//! penalty     = 1 / (1 + avg_penalty / penalty_reference)
//! consistency = 1 / (1 + mad / spread_reference)
//! score       = clamp(100 * (wa*accuracy + wp*penalty + wc*consistency), 0, 100)
//! ```
//!
//! `mad` is the mean absolute deviation of variance percentages from the
//! partition mean. Every factor lies in `[0, 1]`, so with weights summing to
//! one the score stays in `[0, 100]`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::materialize::{VarianceView, UNKNOWN_STAFF};
use crate::variance::classifier::severity_for;
use crate::variance::models::{SeverityBand, VarianceType};

pub const UNKNOWN_COLLECTOR: &str = "Unknown Collector";

/// Which staff identity a rollup partitions by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingKey {
    /// Staff member who collected the milk.
    #[default]
    Collector,
    /// Office staff member who recorded the approval.
    Approver,
}

impl GroupingKey {
    pub fn staff_id<'a>(&self, view: &'a VarianceView) -> Option<&'a str> {
        match self {
            Self::Collector => view.collector_id(),
            Self::Approver => view.approval.approver_id.as_deref(),
        }
    }

    fn staff_name<'a>(&self, view: &'a VarianceView) -> &'a str {
        match self {
            Self::Collector => &view.collector_name,
            Self::Approver => &view.approver_name,
        }
    }

    fn unknown_label(&self) -> &'static str {
        match self {
            Self::Collector => UNKNOWN_COLLECTOR,
            Self::Approver => UNKNOWN_STAFF,
        }
    }
}

impl FromStr for GroupingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "collector" => Ok(Self::Collector),
            "approver" => Ok(Self::Approver),
            other => Err(format!("unknown grouping '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CollectorName,
    TotalCollections,
    TotalVarianceLiters,
    AverageVariancePercentage,
    TotalPenaltyAmount,
    PerformanceScore,
    LastCollectionDate,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "collector_name" => Ok(Self::CollectorName),
            "total_collections" => Ok(Self::TotalCollections),
            "total_variance_liters" | "total_variance" => Ok(Self::TotalVarianceLiters),
            "average_variance_percentage" => Ok(Self::AverageVariancePercentage),
            "total_penalty_amount" => Ok(Self::TotalPenaltyAmount),
            "performance_score" => Ok(Self::PerformanceScore),
            "last_collection_date" => Ok(Self::LastCollectionDate),
            other => Err(format!("unknown sort field '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("unknown sort direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for RollupSort {
    fn default() -> Self {
        Self {
            field: SortField::PerformanceScore,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorPerformanceRollup {
    pub collector_id: Option<String>,
    pub collector_name: String,
    pub total_collections: u64,
    pub total_variance_liters: Decimal,
    pub average_variance_percentage: Decimal,
    pub total_penalty_amount: Decimal,
    pub positive_count: u64,
    pub negative_count: u64,
    pub none_count: u64,
    pub performance_score: Decimal,
    pub last_collection_date: Option<DateTime<Utc>>,
}

impl CollectorPerformanceRollup {
    fn compare(&self, other: &Self, field: SortField) -> Ordering {
        match field {
            SortField::CollectorName => self
                .collector_name
                .to_lowercase()
                .cmp(&other.collector_name.to_lowercase()),
            SortField::TotalCollections => self.total_collections.cmp(&other.total_collections),
            SortField::TotalVarianceLiters => self.total_variance_liters.cmp(&other.total_variance_liters),
            SortField::AverageVariancePercentage => self
                .average_variance_percentage
                .cmp(&other.average_variance_percentage),
            SortField::TotalPenaltyAmount => self.total_penalty_amount.cmp(&other.total_penalty_amount),
            SortField::PerformanceScore => self.performance_score.cmp(&other.performance_score),
            SortField::LastCollectionDate => self.last_collection_date.cmp(&other.last_collection_date),
        }
    }
}

impl fmt::Display for CollectorPerformanceRollup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} collections (+{} / -{} / ={}), avg {}%, penalties {}, score {}",
            self.collector_name,
            self.total_collections,
            self.positive_count,
            self.negative_count,
            self.none_count,
            self.average_variance_percentage,
            self.total_penalty_amount,
            self.performance_score,
        )
    }
}

struct Partition {
    id: Option<String>,
    name: String,
    percentages: Vec<Decimal>,
    variance_liters: Decimal,
    penalty: Decimal,
    positive: u64,
    negative: u64,
    none: u64,
    flagged: u64,
    last: Option<DateTime<Utc>>,
}

impl Partition {
    fn new(id: Option<String>, name: String) -> Self {
        Self {
            id,
            name,
            percentages: Vec::new(),
            variance_liters: Decimal::ZERO,
            penalty: Decimal::ZERO,
            positive: 0,
            negative: 0,
            none: 0,
            flagged: 0,
            last: None,
        }
    }

    fn add(&mut self, view: &VarianceView) {
        let approval = &view.approval;
        self.percentages.push(approval.variance_percentage);
        self.variance_liters += approval.variance_liters;
        self.penalty += approval.penalty_amount;

        match approval.variance_type {
            VarianceType::Positive => self.positive += 1,
            VarianceType::Negative => self.negative += 1,
            VarianceType::None => self.none += 1,
        }
        if approval.variance_type == VarianceType::Negative
            || severity_for(approval.variance_percentage) == SeverityBand::Severe
        {
            self.flagged += 1;
        }

        self.last = Some(match self.last {
            Some(last) => last.max(approval.approved_at),
            None => approval.approved_at,
        });
    }

    fn finish(self, scoring: &ScoringConfig) -> CollectorPerformanceRollup {
        let total = self.percentages.len() as u64;
        let count = Decimal::from(total);
        let (mean, spread) = if total == 0 {
            (Decimal::ZERO, Decimal::ZERO)
        } else {
            let mean = self.percentages.iter().sum::<Decimal>() / count;
            let spread = self.percentages.iter().map(|p| (p - mean).abs()).sum::<Decimal>() / count;
            (mean, spread)
        };
        let avg_penalty = if total == 0 {
            Decimal::ZERO
        } else {
            self.penalty / count
        };

        CollectorPerformanceRollup {
            collector_id: self.id,
            collector_name: self.name,
            total_collections: total,
            total_variance_liters: self.variance_liters,
            average_variance_percentage: mean.round_dp(2),
            total_penalty_amount: self.penalty,
            positive_count: self.positive,
            negative_count: self.negative,
            none_count: self.none,
            performance_score: performance_score(total, self.flagged, avg_penalty, spread, scoring),
            last_collection_date: self.last,
        }
    }
}

/// Bounded composite score in `[0, 100]`, rounded to 2 dp.
pub fn performance_score(
    total: u64,
    flagged: u64,
    average_penalty: Decimal,
    spread: Decimal,
    scoring: &ScoringConfig,
) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    let accuracy = Decimal::ONE - Decimal::from(flagged.min(total)) / Decimal::from(total);
    let penalty = inverse_scale(average_penalty, scoring.penalty_reference);
    let consistency = inverse_scale(spread, scoring.spread_reference);

    let raw = dec!(100)
        * (scoring.accuracy_weight * accuracy
            + scoring.penalty_weight * penalty
            + scoring.consistency_weight * consistency);
    raw.clamp(Decimal::ZERO, dec!(100)).round_dp(2)
}

/// `1 / (1 + value / reference)`, 1 at zero and halving at `reference`.
fn inverse_scale(value: Decimal, reference: Decimal) -> Decimal {
    let value = value.max(Decimal::ZERO);
    if reference <= Decimal::ZERO {
        return if value.is_zero() { Decimal::ONE } else { Decimal::ZERO };
    }
    Decimal::ONE / (Decimal::ONE + value / reference)
}

/// Partition `views` by `grouping` and score each partition.
///
/// Views without a staff id for the chosen key share one unknown partition.
pub fn rollup_collectors(
    views: &[VarianceView],
    grouping: GroupingKey,
    scoring: &ScoringConfig,
    sort: RollupSort,
) -> Vec<CollectorPerformanceRollup> {
    let mut index: HashMap<Option<&str>, usize> = HashMap::new();
    let mut partitions: Vec<Partition> = Vec::new();

    for view in views {
        let id = grouping.staff_id(view);
        let slot = *index.entry(id).or_insert_with(|| {
            let name = match id {
                Some(_) => grouping.staff_name(view).to_string(),
                None => grouping.unknown_label().to_string(),
            };
            partitions.push(Partition::new(id.map(str::to_string), name));
            partitions.len() - 1
        });
        partitions[slot].add(view);
    }

    let mut rollups: Vec<CollectorPerformanceRollup> =
        partitions.into_iter().map(|p| p.finish(scoring)).collect();

    rollups.sort_by(|a, b| match sort.direction {
        SortDirection::Asc => a.compare(b, sort.field),
        SortDirection::Desc => b.compare(a, sort.field),
    });

    tracing::debug!(
        groups = rollups.len(),
        records = views.len(),
        "Collector rollup computed"
    );
    rollups
}
