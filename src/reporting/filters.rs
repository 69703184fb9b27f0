use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::materialize::VarianceView;
use crate::reporting::rollup::GroupingKey;
use crate::store::{columns::approvals, Query};
use crate::variance::models::VarianceType;

/// Inclusive `[from, to]` window over `approved_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Whole calendar days: `from` at 00:00:00Z through `to` at 23:59:59Z.
    pub fn from_dates(from: NaiveDate, to: NaiveDate) -> Self {
        let start = from.and_time(NaiveTime::MIN).and_utc();
        let end = to.and_time(NaiveTime::MIN).and_utc() + Duration::seconds(86_399);
        Self { from: start, to: end }
    }

    /// Window for `timeframe`, anchored on the `to` date where relevant.
    pub fn for_timeframe(timeframe: Timeframe, from: NaiveDate, to: NaiveDate) -> Self {
        match timeframe {
            Timeframe::Custom => Self::from_dates(from, to),
            Timeframe::Daily => Self::from_dates(to, to),
            Timeframe::Weekly => Self::from_dates(to - Duration::days(6), to),
            Timeframe::Monthly => {
                let first = NaiveDate::from_ymd_opt(to.year(), to.month(), 1).unwrap_or(to);
                Self::from_dates(first, to)
            }
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from <= ts && ts <= self.to
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.from.date_naive(), self.to.date_naive())
    }
}

/// Reporting period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[default]
    Custom,
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "custom" => Ok(Self::Custom),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// Filters shared by every report over approvals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilters {
    pub window: Option<DateWindow>,
    /// Staff member, interpreted through the report's [`GroupingKey`].
    pub staff_id: Option<String>,
    pub variance_type: Option<VarianceType>,
    /// Free text matched against collection id and resolved names.
    pub search: Option<String>,
}

impl ReportFilters {
    pub fn within(window: DateWindow) -> Self {
        Self {
            window: Some(window),
            ..Default::default()
        }
    }

    fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Store-side part of the filters, without ordering or paging.
    pub fn to_query(&self, grouping: GroupingKey) -> Query {
        let mut query = Query::new();
        if let Some(window) = &self.window {
            query = query
                .gte(approvals::APPROVED_AT, window.from)
                .lte(approvals::APPROVED_AT, window.to);
        }
        if let Some(variance_type) = self.variance_type {
            query = query.eq(approvals::VARIANCE_TYPE, variance_type.as_str());
        }
        if let (Some(staff_id), GroupingKey::Approver) = (&self.staff_id, grouping) {
            query = query.eq(approvals::APPROVER_ID, staff_id.as_str());
        }
        query
    }

    /// Whether some filter can only be evaluated on materialized rows.
    pub fn needs_materialized_rows(&self, grouping: GroupingKey) -> bool {
        self.search_term().is_some() || (self.staff_id.is_some() && grouping == GroupingKey::Collector)
    }

    /// Apply the filters the store could not evaluate.
    pub fn admits(&self, view: &VarianceView, grouping: GroupingKey) -> bool {
        if let (Some(staff_id), GroupingKey::Collector) = (&self.staff_id, grouping) {
            if view.collector_id() != Some(staff_id.as_str()) {
                return false;
            }
        }
        self.search_term().map_or(true, |term| view.matches_search(term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::store::Filter;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_from_dates_covers_whole_days() {
        let window = DateWindow::from_dates(date(2026, 3, 1), date(2026, 3, 2));
        assert_eq!(window.from, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(window.to, Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 59).unwrap());
        assert!(window.contains(Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 59).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_timeframes_anchor_on_to_date() {
        let from = date(2026, 1, 1);
        let to = date(2026, 3, 18);

        let daily = DateWindow::for_timeframe(Timeframe::Daily, from, to);
        assert_eq!(daily.from.date_naive(), to);

        let weekly = DateWindow::for_timeframe(Timeframe::Weekly, from, to);
        assert_eq!(weekly.from.date_naive(), date(2026, 3, 12));

        let monthly = DateWindow::for_timeframe(Timeframe::Monthly, from, to);
        assert_eq!(monthly.from.date_naive(), date(2026, 3, 1));

        let custom = DateWindow::for_timeframe(Timeframe::Custom, from, to);
        assert_eq!(custom.from.date_naive(), from);
        assert_eq!(custom.to.date_naive(), to);
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("Weekly".parse::<Timeframe>(), Ok(Timeframe::Weekly));
        assert!("hourly".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_query_pushes_down_approver_staff_only() {
        let filters = ReportFilters {
            staff_id: Some("S-1".into()),
            variance_type: Some(VarianceType::Negative),
            ..Default::default()
        };

        let by_collector = filters.to_query(GroupingKey::Collector);
        assert_eq!(by_collector.filters.len(), 1);
        assert!(filters.needs_materialized_rows(GroupingKey::Collector));

        let by_approver = filters.to_query(GroupingKey::Approver);
        assert!(by_approver
            .filters
            .contains(&Filter::Eq(approvals::APPROVER_ID, "S-1".into())));
        assert!(!filters.needs_materialized_rows(GroupingKey::Approver));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let filters = ReportFilters {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert!(!filters.needs_materialized_rows(GroupingKey::Approver));
    }
}
