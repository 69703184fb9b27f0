//! SQLite-backed record store.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::collection::models::{CollectionRecord, Farmer, QualityMeasurement, StaffMember};
use crate::error::StoreError;
use crate::store::columns::{approvals as a, collections as c};
use crate::store::{
    format_timestamp, parse_decimal, parse_timestamp, Entity, Fetched, Filter, Query, RecordStore,
    Value,
};
use crate::variance::approval::draft_approval;
use crate::variance::models::ApprovalRecord;
use crate::variance::penalty::PenaltySchedule;

/// Columns holding decimals as text; compared and sorted numerically.
const NUMERIC_COLUMNS: &[&str] = &[
    a::RECEIVED_LITERS,
    a::VARIANCE_LITERS,
    a::VARIANCE_PERCENTAGE,
    a::PENALTY_AMOUNT,
    c::LITERS,
    c::FAT_CONTENT,
    c::PROTEIN_CONTENT,
    c::SNF_CONTENT,
    c::ACIDITY_LEVEL,
    c::TEMPERATURE,
    c::BACTERIAL_COUNT,
];

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, FromRow)]
struct ApprovalRow {
    id: String,
    collection_id: Option<String>,
    staff_id: Option<String>,
    company_received_liters: String,
    variance_liters: String,
    variance_percentage: String,
    variance_type: String,
    penalty_amount: String,
    approval_notes: Option<String>,
    approved_at: String,
}

#[derive(Debug, Clone, FromRow)]
struct CollectionRow {
    collection_id: String,
    farmer_id: Option<String>,
    staff_id: Option<String>,
    liters: String,
    collection_date: String,
    fat_content: Option<String>,
    protein_content: Option<String>,
    snf_content: Option<String>,
    acidity_level: Option<String>,
    temperature: Option<String>,
    bacterial_count: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct NamedRow {
    id: String,
    full_name: Option<String>,
}

impl TryFrom<ApprovalRow> for ApprovalRecord {
    type Error = StoreError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        const ENTITY: &str = "milk_approvals";
        Ok(Self {
            id: row.id,
            collection_id: row.collection_id,
            approver_id: row.staff_id,
            received_liters: parse_decimal(ENTITY, &row.company_received_liters)?,
            variance_liters: parse_decimal(ENTITY, &row.variance_liters)?,
            variance_percentage: parse_decimal(ENTITY, &row.variance_percentage)?,
            variance_type: row
                .variance_type
                .parse()
                .map_err(|e: String| StoreError::decode(ENTITY, e))?,
            penalty_amount: parse_decimal(ENTITY, &row.penalty_amount)?,
            notes: row.approval_notes,
            approved_at: parse_timestamp(ENTITY, &row.approved_at)?,
        })
    }
}

impl TryFrom<CollectionRow> for CollectionRecord {
    type Error = StoreError;

    fn try_from(row: CollectionRow) -> Result<Self, Self::Error> {
        const ENTITY: &str = "collections";
        let quality = match (
            row.fat_content,
            row.protein_content,
            row.snf_content,
            row.acidity_level,
            row.temperature,
            row.bacterial_count,
        ) {
            (Some(fat), Some(protein), Some(snf), Some(acidity), Some(temp), Some(bacteria)) => {
                Some(QualityMeasurement {
                    fat_content: parse_decimal(ENTITY, &fat)?,
                    protein_content: parse_decimal(ENTITY, &protein)?,
                    snf_content: parse_decimal(ENTITY, &snf)?,
                    acidity_level: parse_decimal(ENTITY, &acidity)?,
                    temperature_c: parse_decimal(ENTITY, &temp)?,
                    bacterial_count_cfu_ml: parse_decimal(ENTITY, &bacteria)?,
                })
            }
            _ => None,
        };

        Ok(Self {
            id: row.collection_id,
            farmer_id: row.farmer_id,
            collector_id: row.staff_id,
            collected_liters: parse_decimal(ENTITY, &row.liters)?,
            collection_date: parse_timestamp(ENTITY, &row.collection_date)?,
            quality,
        })
    }
}

impl SqliteStore {
    /// Create a store from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        let in_memory = database_path == ":memory:";
        let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))
            .context("Invalid database path")?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // Every connection to :memory: is a separate database.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let migration_sql = include_str!("../../migrations/001_init.sql");
        // sqlx executes one statement per call
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to execute migration: {trimmed}"))?;
            }
        }
        Ok(())
    }

    async fn select<R, T>(&self, entity: Entity, query: &Query) -> Result<Fetched<T>, StoreError>
    where
        R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
        T: TryFrom<R, Error = StoreError>,
    {
        query.validate(entity)?;
        if query.is_unsatisfiable() {
            return Ok(Fetched::empty(query.count));
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM {}",
            entity.columns().join(", "),
            entity.table()
        ));
        push_filters(&mut builder, &query.filters);

        for (i, order) in query.order.iter().enumerate() {
            builder.push(if i == 0 { " ORDER BY " } else { ", " });
            builder.push(column_expr(order.field));
            builder.push(if order.ascending { " ASC" } else { " DESC" });
        }
        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                builder.push(" LIMIT ");
                builder.push_bind(limit as i64);
                builder.push(" OFFSET ");
                builder.push_bind(offset.unwrap_or(0) as i64);
            }
            (None, Some(offset)) => {
                builder.push(" LIMIT -1 OFFSET ");
                builder.push_bind(offset as i64);
            }
            (None, None) => {}
        }

        let rows: Vec<R> = builder.build_query_as::<R>().fetch_all(&self.pool).await?;
        let rows = rows
            .into_iter()
            .map(T::try_from)
            .collect::<Result<Vec<T>, StoreError>>()?;

        let total = if query.count {
            Some(self.count(entity, &query.filters).await?)
        } else {
            None
        };

        Ok(Fetched { rows, total })
    }

    async fn count(&self, entity: Entity, filters: &[Filter]) -> Result<u64, StoreError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", entity.table()));
        push_filters(&mut builder, filters);
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    // --- Writes ---

    pub async fn insert_farmer(&self, farmer: &Farmer) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO farmers (id, full_name) VALUES (?, ?)")
            .bind(&farmer.id)
            .bind(&farmer.full_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_staff(&self, staff: &StaffMember) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO staff (id, full_name) VALUES (?, ?)")
            .bind(&staff.id)
            .bind(&staff.full_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_collection(&self, collection: &CollectionRecord) -> Result<(), StoreError> {
        let quality = collection.quality.as_ref();
        let text = |f: fn(&QualityMeasurement) -> Decimal| quality.map(|q| f(q).to_string());

        sqlx::query(
            "INSERT OR REPLACE INTO collections (collection_id, farmer_id, staff_id, liters, collection_date, fat_content, protein_content, snf_content, acidity_level, temperature, bacterial_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&collection.id)
        .bind(&collection.farmer_id)
        .bind(&collection.collector_id)
        .bind(collection.collected_liters.to_string())
        .bind(format_timestamp(collection.collection_date))
        .bind(text(|q| q.fat_content))
        .bind(text(|q| q.protein_content))
        .bind(text(|q| q.snf_content))
        .bind(text(|q| q.acidity_level))
        .bind(text(|q| q.temperature_c))
        .bind(text(|q| q.bacterial_count_cfu_ml))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a small demo cooperative: three farmers, two collectors, one
    /// office approver, and a week of approved collections.
    pub async fn seed(&self, schedule: &PenaltySchedule) -> Result<usize> {
        let farmers = [
            ("F-001", "Wanjiru Kamau"),
            ("F-002", "Otieno Odhiambo"),
            ("F-003", "Achieng Atieno"),
        ];
        for (id, name) in farmers {
            self.insert_farmer(&Farmer {
                id: id.to_string(),
                full_name: Some(name.to_string()),
            })
            .await?;
        }

        let staff = [
            ("S-001", "Peter Mwangi"),
            ("S-002", "Grace Njeri"),
            ("S-100", "Office Approver"),
        ];
        for (id, name) in staff {
            self.insert_staff(&StaffMember {
                id: id.to_string(),
                full_name: Some(name.to_string()),
            })
            .await?;
        }

        // (farmer, collector, collected, received, days ago)
        let pickups = [
            ("F-001", "S-001", dec!(40), dec!(40), 6),
            ("F-002", "S-001", dec!(35), dec!(33.5), 5),
            ("F-003", "S-002", dec!(50), dec!(51), 5),
            ("F-001", "S-002", dec!(42), dec!(37), 3),
            ("F-002", "S-001", dec!(30), dec!(30.2), 2),
            ("F-003", "S-002", dec!(48), dec!(48), 1),
            ("F-001", "S-001", dec!(41), dec!(39), 0),
        ];

        let now = Utc::now();
        let mut approvals = 0usize;
        for (i, (farmer, collector, collected, received, days_ago)) in pickups.into_iter().enumerate() {
            let collection_date = now - Duration::days(days_ago) - Duration::hours(4);
            let collection = CollectionRecord {
                id: format!("COL-{:04}", i + 1),
                farmer_id: Some(farmer.to_string()),
                collector_id: Some(collector.to_string()),
                collected_liters: collected,
                collection_date,
                quality: Some(QualityMeasurement {
                    fat_content: dec!(3.8),
                    protein_content: dec!(3.2),
                    snf_content: dec!(8.7),
                    acidity_level: dec!(0.15),
                    temperature_c: dec!(4),
                    bacterial_count_cfu_ml: Decimal::from(800 + 400 * i as i64),
                }),
            };
            self.insert_collection(&collection).await?;

            let approval = draft_approval(
                &collection,
                received,
                "S-100",
                None,
                schedule,
                collection_date + Duration::hours(2),
            );
            match self.insert_approval(&approval).await {
                Ok(()) => approvals += 1,
                Err(e) if e.is_conflict() => {
                    tracing::debug!(collection_id = %collection.id, "Seed approval already present");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(approvals, "Seed data inserted");
        Ok(approvals)
    }
}

fn column_expr(field: &'static str) -> String {
    if NUMERIC_COLUMNS.contains(&field) {
        format!("CAST({field} AS REAL)")
    } else {
        field.to_string()
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        // Bound as text and cast in SQL, the same way numeric columns are read.
        Value::Number(n) => {
            builder.push("CAST(");
            builder.push_bind(n.to_string());
            builder.push(" AS REAL)");
        }
        other => {
            builder.push_bind(other.render());
        }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filters: &[Filter]) {
    for (i, filter) in filters.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        match filter {
            Filter::Eq(field, value) => {
                builder.push(column_expr(field));
                builder.push(" = ");
                push_value(builder, value);
            }
            Filter::Gte(field, value) => {
                builder.push(column_expr(field));
                builder.push(" >= ");
                push_value(builder, value);
            }
            Filter::Lte(field, value) => {
                builder.push(column_expr(field));
                builder.push(" <= ");
                push_value(builder, value);
            }
            Filter::In(field, ids) => {
                builder.push(*field);
                builder.push(" IN (");
                let mut separated = builder.separated(", ");
                for id in ids {
                    separated.push_bind(id.clone());
                }
                separated.push_unseparated(")");
            }
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn fetch_approvals(&self, query: &Query) -> Result<Fetched<ApprovalRecord>, StoreError> {
        self.select::<ApprovalRow, ApprovalRecord>(Entity::Approvals, query)
            .await
    }

    async fn fetch_collections(
        &self,
        query: &Query,
    ) -> Result<Fetched<CollectionRecord>, StoreError> {
        self.select::<CollectionRow, CollectionRecord>(Entity::Collections, query)
            .await
    }

    async fn fetch_farmers(&self, query: &Query) -> Result<Fetched<Farmer>, StoreError> {
        self.select::<NamedRow, Farmer>(Entity::Farmers, query).await
    }

    async fn fetch_staff(&self, query: &Query) -> Result<Fetched<StaffMember>, StoreError> {
        self.select::<NamedRow, StaffMember>(Entity::Staff, query).await
    }

    async fn insert_approval(&self, approval: &ApprovalRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO milk_approvals (id, collection_id, staff_id, company_received_liters, variance_liters, variance_percentage, variance_type, penalty_amount, approval_notes, approved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id)
        .bind(&approval.collection_id)
        .bind(&approval.approver_id)
        .bind(approval.received_liters.to_string())
        .bind(approval.variance_liters.to_string())
        .bind(approval.variance_percentage.to_string())
        .bind(approval.variance_type.as_str())
        .bind(approval.penalty_amount.to_string())
        .bind(&approval.notes)
        .bind(format_timestamp(approval.approved_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

impl TryFrom<NamedRow> for Farmer {
    type Error = StoreError;

    fn try_from(row: NamedRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            full_name: row.full_name,
        })
    }
}

impl TryFrom<NamedRow> for StaffMember {
    type Error = StoreError;

    fn try_from(row: NamedRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            full_name: row.full_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::columns;
    use crate::variance::models::VarianceType;
    use chrono::TimeZone;

    fn approval(id: &str, staff: &str, variance: Decimal, day: u32) -> ApprovalRecord {
        ApprovalRecord {
            id: id.to_string(),
            collection_id: Some(format!("COL-{id}")),
            approver_id: Some(staff.to_string()),
            received_liters: dec!(100) + variance,
            variance_liters: variance,
            variance_percentage: variance,
            variance_type: VarianceType::from_liters(variance),
            penalty_amount: dec!(1.5),
            notes: None,
            approved_at: Utc.with_ymd_and_hms(2026, 4, day, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_store_create_and_migrate() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        let fetched = store
            .fetch_approvals(&Query::new().with_count())
            .await
            .expect("should query empty table");
        assert!(fetched.rows.is_empty());
        assert_eq!(fetched.total, Some(0));
    }

    #[tokio::test]
    async fn test_approval_insert_and_filtered_page() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        for (i, (staff, variance)) in [("S-1", dec!(-2)), ("S-2", dec!(3)), ("S-1", dec!(0)), ("S-1", dec!(-1))]
            .into_iter()
            .enumerate()
        {
            store
                .insert_approval(&approval(&format!("a{i}"), staff, variance, i as u32 + 1))
                .await
                .expect("should insert");
        }

        let query = Query::new()
            .eq(columns::approvals::APPROVER_ID, "S-1")
            .gte(columns::approvals::APPROVED_AT, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap())
            .order_by(columns::approvals::APPROVED_AT, false)
            .page(0, 2)
            .with_count();
        let fetched = store.fetch_approvals(&query).await.expect("should fetch");

        assert_eq!(fetched.total, Some(3));
        assert_eq!(fetched.rows.len(), 2);
        assert_eq!(fetched.rows[0].id, "a3");
        assert_eq!(fetched.rows[1].id, "a2");
        assert_eq!(fetched.rows[0].variance_type, VarianceType::Negative);
        assert_eq!(fetched.rows[0].penalty_amount, dec!(1.5));
    }

    #[tokio::test]
    async fn test_numeric_ordering_is_not_lexicographic() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        store.insert_approval(&approval("big", "S-1", dec!(10), 1)).await.unwrap();
        store.insert_approval(&approval("small", "S-1", dec!(9), 2)).await.unwrap();

        let fetched = store
            .fetch_approvals(&Query::new().order_by(columns::approvals::VARIANCE_LITERS, true))
            .await
            .unwrap();
        assert_eq!(fetched.rows[0].id, "small");
    }

    #[tokio::test]
    async fn test_numeric_filter_compares_decimal_operand() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        store.insert_approval(&approval("big", "S-1", dec!(10), 1)).await.unwrap();
        store.insert_approval(&approval("small", "S-1", dec!(9), 2)).await.unwrap();

        let fetched = store
            .fetch_approvals(&Query::new().gte(columns::approvals::VARIANCE_LITERS, dec!(9.5)))
            .await
            .unwrap();
        assert_eq!(fetched.rows.len(), 1);
        assert_eq!(fetched.rows[0].id, "big");

        let exact = store
            .fetch_approvals(&Query::new().eq(columns::approvals::VARIANCE_LITERS, dec!(9.00)))
            .await
            .unwrap();
        assert_eq!(exact.rows.len(), 1);
        assert_eq!(exact.rows[0].id, "small");
    }

    #[tokio::test]
    async fn test_second_approval_for_collection_conflicts() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        store.insert_approval(&approval("first", "S-1", dec!(1), 1)).await.unwrap();

        let mut duplicate = approval("second", "S-2", dec!(-1), 2);
        duplicate.collection_id = Some("COL-first".to_string());
        let err = store.insert_approval(&duplicate).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_batch_fetch_by_ids() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        for (id, name) in [("F-1", Some("Amina")), ("F-2", None), ("F-3", Some("Baraka"))] {
            store
                .insert_farmer(&Farmer {
                    id: id.to_string(),
                    full_name: name.map(str::to_string),
                })
                .await
                .unwrap();
        }

        let fetched = store
            .fetch_farmers(&Query::by_ids(
                Entity::Farmers,
                vec!["F-1".into(), "F-2".into(), "F-9".into()],
            ))
            .await
            .unwrap();
        assert_eq!(fetched.rows.len(), 2);
        assert!(fetched.rows.iter().any(|f| f.id == "F-2" && f.full_name.is_none()));

        let none = store
            .fetch_farmers(&Query::by_ids(Entity::Farmers, vec![]))
            .await
            .unwrap();
        assert!(none.rows.is_empty());
    }

    #[tokio::test]
    async fn test_collection_quality_roundtrip() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        let collection = CollectionRecord {
            id: "COL-9".to_string(),
            farmer_id: Some("F-1".to_string()),
            collector_id: Some("S-1".to_string()),
            collected_liters: dec!(22.5),
            collection_date: Utc.with_ymd_and_hms(2026, 4, 2, 6, 30, 0).unwrap(),
            quality: Some(QualityMeasurement {
                fat_content: dec!(3.9),
                protein_content: dec!(3.1),
                snf_content: dec!(8.6),
                acidity_level: dec!(0.16),
                temperature_c: dec!(3.5),
                bacterial_count_cfu_ml: dec!(900),
            }),
        };
        store.insert_collection(&collection).await.unwrap();

        let fetched = store
            .fetch_collections(&Query::by_ids(Entity::Collections, vec!["COL-9".into()]))
            .await
            .unwrap();
        assert_eq!(fetched.rows, vec![collection]);
    }

    #[tokio::test]
    async fn test_seed_populates_all_tables() {
        let store = SqliteStore::new(":memory:").await.expect("should create store");
        let inserted = store.seed(&PenaltySchedule::default()).await.expect("should seed");
        assert_eq!(inserted, 7);
        assert_eq!(store.seed(&PenaltySchedule::default()).await.expect("should reseed"), 0);

        let staff = store.fetch_staff(&Query::new().with_count()).await.unwrap();
        assert_eq!(staff.total, Some(3));
        let approvals = store.fetch_approvals(&Query::new()).await.unwrap();
        assert!(approvals.rows.iter().all(|a| a.validate().is_ok()));
    }
}
