//! Report assembly over a [`RecordStore`].
//!
//! The primary approval fetch is the only fatal step: it runs under a
//! timeout and its failure surfaces as [`ReportError`]. Everything joined on
//! afterwards degrades per relation inside [`materialize`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{ReportingConfig, ScoringConfig};
use crate::error::{ReportError, StoreError};
use crate::materialize::{materialize, Materialized, Relation, VarianceView};
use crate::reporting::comparison::PeriodComparison;
use crate::reporting::filters::ReportFilters;
use crate::reporting::rollup::{rollup_collectors, CollectorPerformanceRollup, GroupingKey, RollupSort};
use crate::reporting::summary::{PerformanceMetrics, PeriodSummary};
use crate::reporting::trend::{bucketize, TrendBucket};
use crate::store::{columns::approvals, Fetched, Query, RecordStore};
use crate::variance::models::ApprovalRecord;

/// One page of the variance listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariancePage {
    pub rows: Vec<VarianceView>,
    /// Matching rows across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u64,
    pub page_size: u64,
    pub degraded: Vec<Relation>,
}

impl VariancePage {
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

/// Everything the dashboard shows for one period, from a single fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dashboard {
    pub summary: PeriodSummary,
    pub metrics: PerformanceMetrics,
    pub collectors: Vec<CollectorPerformanceRollup>,
    pub trend: Vec<TrendBucket>,
    pub degraded: Vec<Relation>,
}

/// Approval time descending, ties broken by id so offset paging is stable.
fn newest_first(query: Query) -> Query {
    query
        .order_by(approvals::APPROVED_AT, false)
        .order_by(approvals::ID, false)
}

pub struct VarianceReporter {
    store: Arc<dyn RecordStore>,
    grouping: GroupingKey,
    scoring: ScoringConfig,
    page_size: u64,
    batch_size: u64,
    fetch_timeout: Duration,
}

impl VarianceReporter {
    pub fn new(store: Arc<dyn RecordStore>, reporting: &ReportingConfig, scoring: ScoringConfig) -> Self {
        Self {
            store,
            grouping: reporting.grouping,
            scoring,
            page_size: reporting.page_size.max(1),
            batch_size: reporting.fetch_batch_size.max(1),
            fetch_timeout: Duration::from_secs(reporting.fetch_timeout_seconds),
        }
    }

    pub fn with_grouping(mut self, grouping: GroupingKey) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn grouping(&self) -> GroupingKey {
        self.grouping
    }

    async fn primary<T>(
        &self,
        request: impl Future<Output = Result<Fetched<T>, StoreError>>,
    ) -> Result<Fetched<T>, ReportError> {
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ReportError::Timeout(self.fetch_timeout)),
        }
    }

    /// Every approval the store-side filters admit, newest first.
    async fn fetch_all(&self, filters: &ReportFilters) -> Result<Vec<ApprovalRecord>, ReportError> {
        let base = newest_first(filters.to_query(self.grouping));
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let query = base.clone().page(offset, self.batch_size);
            let batch = self.primary(self.store.fetch_approvals(&query)).await?;
            let fetched = batch.rows.len() as u64;
            records.extend(batch.rows);

            if fetched < self.batch_size {
                break;
            }
            offset += fetched;
        }

        tracing::debug!(
            records = records.len(),
            store = self.store.name(),
            "Approval window fetched"
        );
        Ok(records)
    }

    /// Materialized rows for the whole window with every filter applied.
    async fn filtered_views(&self, filters: &ReportFilters) -> Result<Materialized, ReportError> {
        let records = self.fetch_all(filters).await?;
        let mut materialized = materialize(self.store.as_ref(), records).await;
        materialized
            .views
            .retain(|view| filters.admits(view, self.grouping));
        Ok(materialized)
    }

    /// Approvals for the window, materializing only when a filter needs names.
    async fn filtered_records(&self, filters: &ReportFilters) -> Result<Vec<ApprovalRecord>, ReportError> {
        if filters.needs_materialized_rows(self.grouping) {
            let materialized = self.filtered_views(filters).await?;
            Ok(materialized.views.into_iter().map(|v| v.approval).collect())
        } else {
            self.fetch_all(filters).await
        }
    }

    /// Paginated composite rows, newest first.
    ///
    /// Filters the store cannot evaluate are applied before paging, so
    /// `total` always counts matching rows.
    pub async fn variance_page(&self, filters: &ReportFilters, page: u64) -> Result<VariancePage, ReportError> {
        let page = page.max(1);
        let offset = (page - 1) * self.page_size;

        let (rows, total, degraded) = if filters.needs_materialized_rows(self.grouping) {
            let materialized = self.filtered_views(filters).await?;
            let total = materialized.views.len() as u64;
            let rows = materialized
                .views
                .into_iter()
                .skip(offset as usize)
                .take(self.page_size as usize)
                .collect();
            (rows, total, materialized.degraded)
        } else {
            let query = newest_first(filters.to_query(self.grouping))
                .page(offset, self.page_size)
                .with_count();
            let fetched = self.primary(self.store.fetch_approvals(&query)).await?;
            let total = fetched.total.unwrap_or(offset + fetched.rows.len() as u64);
            let materialized = materialize(self.store.as_ref(), fetched.rows).await;
            (materialized.views, total, materialized.degraded)
        };

        tracing::info!(page, total, rows = rows.len(), "Variance page assembled");
        Ok(VariancePage {
            rows,
            total,
            page,
            page_size: self.page_size,
            degraded,
        })
    }

    pub async fn summary(&self, filters: &ReportFilters) -> Result<PeriodSummary, ReportError> {
        let records = self.filtered_records(filters).await?;
        Ok(PeriodSummary::from_records(&records, filters.window))
    }

    pub async fn collector_performance(
        &self,
        filters: &ReportFilters,
        sort: RollupSort,
    ) -> Result<Vec<CollectorPerformanceRollup>, ReportError> {
        let materialized = self.filtered_views(filters).await?;
        Ok(rollup_collectors(&materialized.views, self.grouping, &self.scoring, sort))
    }

    pub async fn trend(&self, filters: &ReportFilters) -> Result<Vec<TrendBucket>, ReportError> {
        let records = self.filtered_records(filters).await?;
        Ok(bucketize(&records, filters.window.as_ref()))
    }

    pub async fn dashboard(&self, filters: &ReportFilters, sort: RollupSort) -> Result<Dashboard, ReportError> {
        let materialized = self.filtered_views(filters).await?;
        let collectors = rollup_collectors(&materialized.views, self.grouping, &self.scoring, sort);

        let records: Vec<&ApprovalRecord> = materialized.views.iter().map(|v| &v.approval).collect();
        let summary = PeriodSummary::from_records(records.iter().copied(), filters.window);
        let trend = bucketize(records.iter().copied(), filters.window.as_ref());
        let metrics = PerformanceMetrics::compute(&summary, &collectors);

        Ok(Dashboard {
            summary,
            metrics,
            collectors,
            trend,
            degraded: materialized.degraded,
        })
    }

    /// Summaries of two periods, fetched concurrently, and their differences.
    pub async fn compare(
        &self,
        current: &ReportFilters,
        previous: &ReportFilters,
    ) -> Result<PeriodComparison, ReportError> {
        let (current, previous) = tokio::try_join!(self.summary(current), self.summary(previous))?;
        Ok(PeriodComparison::between(current, previous))
    }

    /// Every approval recorded against one collection.
    pub async fn collection_history(&self, collection_id: &str) -> Result<Vec<VarianceView>, ReportError> {
        let query = newest_first(Query::new().eq(approvals::COLLECTION_ID, collection_id));
        let fetched = self.primary(self.store.fetch_approvals(&query)).await?;
        Ok(materialize(self.store.as_ref(), fetched.rows).await.views)
    }
}
