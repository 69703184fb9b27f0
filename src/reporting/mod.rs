//! Variance reporting: filters, rollups, trends, summaries and comparisons.

pub mod comparison;
pub mod filters;
pub mod rollup;
pub mod service;
pub mod summary;
pub mod trend;

pub use comparison::{percent_change, PeriodComparison};
pub use filters::{DateWindow, ReportFilters, Timeframe};
pub use rollup::{CollectorPerformanceRollup, GroupingKey, RollupSort, SortDirection, SortField};
pub use service::{Dashboard, VariancePage, VarianceReporter};
pub use summary::{PerformanceMetrics, PeriodSummary};
pub use trend::TrendBucket;
