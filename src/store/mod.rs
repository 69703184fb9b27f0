//! Backing record store abstraction.
//!
//! The engine reads flat entity tables through [`RecordStore`] and never relies
//! on the store to follow relations. Each backend translates a [`Query`]
//! (equality, range and id-set filters, ordering, offset/limit, optional exact
//! count) into its own dialect.

pub mod rest;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use crate::collection::models::{CollectionRecord, Farmer, StaffMember};
use crate::error::StoreError;
use crate::variance::models::ApprovalRecord;

/// Column names shared by every backend.
pub mod columns {
    pub const ID: &str = "id";
    pub const FULL_NAME: &str = "full_name";

    pub mod approvals {
        pub const ID: &str = "id";
        pub const COLLECTION_ID: &str = "collection_id";
        pub const APPROVER_ID: &str = "staff_id";
        pub const RECEIVED_LITERS: &str = "company_received_liters";
        pub const VARIANCE_LITERS: &str = "variance_liters";
        pub const VARIANCE_PERCENTAGE: &str = "variance_percentage";
        pub const VARIANCE_TYPE: &str = "variance_type";
        pub const PENALTY_AMOUNT: &str = "penalty_amount";
        pub const NOTES: &str = "approval_notes";
        pub const APPROVED_AT: &str = "approved_at";
    }

    pub mod collections {
        pub const ID: &str = "collection_id";
        pub const FARMER_ID: &str = "farmer_id";
        pub const COLLECTOR_ID: &str = "staff_id";
        pub const LITERS: &str = "liters";
        pub const COLLECTION_DATE: &str = "collection_date";
        pub const FAT_CONTENT: &str = "fat_content";
        pub const PROTEIN_CONTENT: &str = "protein_content";
        pub const SNF_CONTENT: &str = "snf_content";
        pub const ACIDITY_LEVEL: &str = "acidity_level";
        pub const TEMPERATURE: &str = "temperature";
        pub const BACTERIAL_COUNT: &str = "bacterial_count";
    }
}

/// Entity collections exposed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Approvals,
    Collections,
    Farmers,
    Staff,
}

impl Entity {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Approvals => "milk_approvals",
            Self::Collections => "collections",
            Self::Farmers => "farmers",
            Self::Staff => "staff",
        }
    }

    /// Identifier column that foreign keys point at.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Collections => columns::collections::ID,
            _ => columns::ID,
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        use columns::{approvals as a, collections as c};
        match self {
            Self::Approvals => &[
                a::ID,
                a::COLLECTION_ID,
                a::APPROVER_ID,
                a::RECEIVED_LITERS,
                a::VARIANCE_LITERS,
                a::VARIANCE_PERCENTAGE,
                a::VARIANCE_TYPE,
                a::PENALTY_AMOUNT,
                a::NOTES,
                a::APPROVED_AT,
            ],
            Self::Collections => &[
                c::ID,
                c::FARMER_ID,
                c::COLLECTOR_ID,
                c::LITERS,
                c::COLLECTION_DATE,
                c::FAT_CONTENT,
                c::PROTEIN_CONTENT,
                c::SNF_CONTENT,
                c::ACIDITY_LEVEL,
                c::TEMPERATURE,
                c::BACTERIAL_COUNT,
            ],
            Self::Farmers | Self::Staff => &[columns::ID, columns::FULL_NAME],
        }
    }

    fn check_column(&self, field: &str) -> Result<(), StoreError> {
        if self.columns().contains(&field) {
            Ok(())
        } else {
            Err(StoreError::UnknownField {
                entity: self.table(),
                field: field.to_string(),
            })
        }
    }
}

/// A filter operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Timestamp(DateTime<Utc>),
    Number(Decimal),
}

impl Value {
    /// Canonical textual form, as stored and as sent over the wire.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Timestamp(ts) => format_timestamp(*ts),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Self::Number(n)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    Gte(&'static str, Value),
    Lte(&'static str, Value),
    In(&'static str, Vec<String>),
}

impl Filter {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Eq(f, _) | Self::Gte(f, _) | Self::Lte(f, _) | Self::In(f, _) => f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: &'static str,
    pub ascending: bool,
}

/// Query over a single entity collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first.
    pub order: Vec<OrderBy>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    /// Ask the store for the total number of matching rows.
    pub count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch lookup by identifier.
    pub fn by_ids(entity: Entity, ids: Vec<String>) -> Self {
        Self::new().within(entity.key(), ids)
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field, value.into()));
        self
    }

    pub fn gte(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(field, value.into()));
        self
    }

    pub fn lte(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(field, value.into()));
        self
    }

    pub fn within(mut self, field: &'static str, ids: Vec<String>) -> Self {
        self.filters.push(Filter::In(field, ids));
        self
    }

    /// Add a sort key after any already present.
    pub fn order_by(mut self, field: &'static str, ascending: bool) -> Self {
        self.order.push(OrderBy { field, ascending });
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    /// An empty id set can never match; backends answer without a round trip.
    pub fn is_unsatisfiable(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, Filter::In(_, ids) if ids.is_empty()))
    }

    pub(crate) fn validate(&self, entity: Entity) -> Result<(), StoreError> {
        for filter in &self.filters {
            entity.check_column(filter.field())?;
        }
        for order in &self.order {
            entity.check_column(order.field)?;
        }
        Ok(())
    }
}

/// Rows returned by a store query, with the exact match count when requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub rows: Vec<T>,
    pub total: Option<u64>,
}

impl<T> Fetched<T> {
    pub fn empty(count_requested: bool) -> Self {
        Self {
            rows: Vec::new(),
            total: count_requested.then_some(0),
        }
    }
}

/// Trait for the backing store the engine reads from.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_approvals(&self, query: &Query) -> Result<Fetched<ApprovalRecord>, StoreError>;

    async fn fetch_collections(&self, query: &Query)
        -> Result<Fetched<CollectionRecord>, StoreError>;

    async fn fetch_farmers(&self, query: &Query) -> Result<Fetched<Farmer>, StoreError>;

    async fn fetch_staff(&self, query: &Query) -> Result<Fetched<StaffMember>, StoreError>;

    /// Persist a newly drafted approval.
    async fn insert_approval(&self, approval: &ApprovalRecord) -> Result<(), StoreError>;

    /// Human-readable name of this backend.
    fn name(&self) -> &str;
}

/// Timestamps are stored and compared as fixed-width RFC 3339 UTC strings.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(entity: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::decode(entity, format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn parse_decimal(entity: &'static str, raw: &str) -> Result<Decimal, StoreError> {
    raw.trim()
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|e| StoreError::decode(entity, format!("bad number '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_query_builder_accumulates() {
        let q = Query::new()
            .eq(columns::approvals::VARIANCE_TYPE, "negative")
            .order_by(columns::approvals::APPROVED_AT, false)
            .page(20, 10)
            .with_count();
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.order.len(), 1);
        assert_eq!(q.offset, Some(20));
        assert_eq!(q.limit, Some(10));
        assert!(q.count);
        assert!(q.validate(Entity::Approvals).is_ok());
    }

    #[test]
    fn test_empty_id_set_is_unsatisfiable() {
        assert!(Query::by_ids(Entity::Farmers, vec![]).is_unsatisfiable());
        assert!(!Query::by_ids(Entity::Farmers, vec!["f-1".into()]).is_unsatisfiable());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let q = Query::new().eq("password", "x");
        assert!(matches!(
            q.validate(Entity::Staff),
            Err(StoreError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_collections_keyed_by_collection_id() {
        let q = Query::by_ids(Entity::Collections, vec!["COL-1".into()]);
        assert_eq!(q.filters[0].field(), "collection_id");
    }

    #[test]
    fn test_value_render() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(Value::from(ts).render(), "2026-01-02T03:04:05.000Z");
        assert_eq!(Value::from(dec!(12.50)).render(), "12.50");
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_decimal("x", " 4.25 ").unwrap(), dec!(4.25));
        assert!(parse_decimal("x", "abc").is_err());
        let ts = parse_timestamp("x", "2026-01-02T03:04:05+03:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 1, 2, 0, 4, 5).unwrap());
    }
}
