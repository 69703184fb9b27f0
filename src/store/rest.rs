//! PostgREST-style HTTP record store.
//!
//! Translates [`Query`] into `field=op.value` query parameters, reads the exact
//! row count from `Content-Range` when asked, and wraps every request in rate
//! limiting and exponential-backoff retries.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::collection::models::{CollectionRecord, Farmer, QualityMeasurement, StaffMember};
use crate::config::RateLimitConfig;
use crate::error::StoreError;
use crate::store::{
    format_timestamp, parse_decimal, parse_timestamp, Entity, Fetched, Filter, Query, RecordStore,
};
use crate::variance::models::ApprovalRecord;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RestStore {
    http: reqwest::Client,
    /// Base URL without trailing slash, e.g. `https://project.example.co`
    base_url: String,
    api_key: Option<SecretString>,
    limiter: Arc<Limiter>,
    retry: RateLimitConfig,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        rate_limit: &RateLimitConfig,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .user_agent("dairy-reconcile/0.1")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: create_rate_limiter(rate_limit),
            retry: rate_limit.clone(),
        })
    }

    fn table_url(&self, entity: Entity) -> String {
        format!("{}/rest/v1/{}", self.base_url, entity.table())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key.expose_secret())
                .bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    #[instrument(skip(self, query), fields(table = entity.table()))]
    async fn get_rows<T: DeserializeOwned>(
        &self,
        entity: Entity,
        query: &Query,
    ) -> Result<Fetched<T>, StoreError> {
        query.validate(entity)?;
        if query.is_unsatisfiable() {
            return Ok(Fetched::empty(query.count));
        }

        let url = self.table_url(entity);
        let params = query_params(entity, query);

        self.with_retry(|| {
            let url = url.clone();
            let params = params.clone();
            async move {
                self.limiter.until_ready().await;

                let mut request = self.authorize(self.http.get(&url)).query(&params);
                if query.count {
                    request = request.header("Prefer", "count=exact");
                }

                let resp = request.send().await?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(StoreError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }

                let total = if query.count {
                    resp.headers()
                        .get("content-range")
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_content_range)
                } else {
                    None
                };

                let rows = resp.json::<Vec<T>>().await?;
                Ok(Fetched { rows, total })
            }
        })
        .await
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let max_retries = self.retry.max_retries;
        let base_ms = self.retry.backoff_base_ms;
        let max_ms = self.retry.backoff_max_ms;

        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;

                    if !e.is_transient() || attempt > max_retries {
                        return Err(e);
                    }

                    let backoff_ms = std::cmp::min(
                        base_ms.saturating_mul(2u64.saturating_pow(attempt - 1)),
                        max_ms,
                    );

                    warn!(
                        attempt,
                        backoff_ms,
                        error = %e,
                        "Retrying store request after transient failure"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn fetch_approvals(&self, query: &Query) -> Result<Fetched<ApprovalRecord>, StoreError> {
        let fetched: Fetched<ApprovalJson> = self.get_rows(Entity::Approvals, query).await?;
        convert_rows(fetched)
    }

    async fn fetch_collections(
        &self,
        query: &Query,
    ) -> Result<Fetched<CollectionRecord>, StoreError> {
        let fetched: Fetched<CollectionJson> = self.get_rows(Entity::Collections, query).await?;
        convert_rows(fetched)
    }

    async fn fetch_farmers(&self, query: &Query) -> Result<Fetched<Farmer>, StoreError> {
        let fetched: Fetched<FarmerJson> = self.get_rows(Entity::Farmers, query).await?;
        convert_rows(fetched)
    }

    async fn fetch_staff(&self, query: &Query) -> Result<Fetched<StaffMember>, StoreError> {
        let fetched: Fetched<StaffJson> = self.get_rows(Entity::Staff, query).await?;
        convert_rows(fetched)
    }

    async fn insert_approval(&self, approval: &ApprovalRecord) -> Result<(), StoreError> {
        let url = self.table_url(Entity::Approvals);
        let body = serde_json::json!({
            "id": approval.id,
            "collection_id": approval.collection_id,
            "staff_id": approval.approver_id,
            "company_received_liters": approval.received_liters.to_string(),
            "variance_liters": approval.variance_liters.to_string(),
            "variance_percentage": approval.variance_percentage.to_string(),
            "variance_type": approval.variance_type.as_str(),
            "penalty_amount": approval.penalty_amount.to_string(),
            "approval_notes": approval.notes,
            "approved_at": format_timestamp(approval.approved_at),
        });

        // Inserts are not idempotent; a single attempt only.
        self.limiter.until_ready().await;
        let resp = self
            .authorize(self.http.post(&url))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "rest"
    }
}

fn create_rate_limiter(config: &RateLimitConfig) -> Arc<Limiter> {
    let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(rps);

    let quota = Quota::per_second(rps).allow_burst(burst);
    Arc::new(RateLimiter::direct(quota))
}

fn select_clause(entity: Entity) -> String {
    match entity {
        // Staff names live on the linked profile.
        Entity::Staff => "id,profiles(full_name)".to_string(),
        other => other.columns().join(","),
    }
}

/// Render a query as PostgREST parameters.
pub(crate) fn query_params(entity: Entity, query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), select_clause(entity))];

    for filter in &query.filters {
        let (field, expr) = match filter {
            Filter::Eq(f, v) => (f, format!("eq.{}", v.render())),
            Filter::Gte(f, v) => (f, format!("gte.{}", v.render())),
            Filter::Lte(f, v) => (f, format!("lte.{}", v.render())),
            Filter::In(f, ids) => {
                let quoted: Vec<String> = ids
                    .iter()
                    .map(|id| format!("\"{}\"", id.replace('"', "\\\"")))
                    .collect();
                (f, format!("in.({})", quoted.join(",")))
            }
        };
        params.push((field.to_string(), expr));
    }

    if !query.order.is_empty() {
        let keys: Vec<String> = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.field, if o.ascending { "asc" } else { "desc" }))
            .collect();
        params.push(("order".to_string(), keys.join(",")));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

/// Total from a `Content-Range` header such as `0-24/342`; `*` means unknown.
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

// === Wire rows ===
//
// Numeric columns arrive as JSON numbers or strings depending on the column
// type, so they are taken as raw JSON and converted without a float round trip.

fn json_decimal(entity: &'static str, value: &serde_json::Value) -> Result<Decimal, StoreError> {
    match value {
        serde_json::Value::Number(n) => parse_decimal(entity, &n.to_string()),
        serde_json::Value::String(s) => parse_decimal(entity, s),
        other => Err(StoreError::decode(entity, format!("expected number, got {other}"))),
    }
}

fn json_decimal_opt(
    entity: &'static str,
    value: &serde_json::Value,
) -> Result<Option<Decimal>, StoreError> {
    if value.is_null() {
        Ok(None)
    } else {
        json_decimal(entity, value).map(Some)
    }
}

fn convert_rows<W, T>(fetched: Fetched<W>) -> Result<Fetched<T>, StoreError>
where
    T: TryFrom<W, Error = StoreError>,
{
    let rows = fetched
        .rows
        .into_iter()
        .map(T::try_from)
        .collect::<Result<Vec<T>, StoreError>>()?;
    Ok(Fetched {
        rows,
        total: fetched.total,
    })
}

#[derive(Debug, Deserialize)]
struct ApprovalJson {
    id: String,
    collection_id: Option<String>,
    staff_id: Option<String>,
    company_received_liters: serde_json::Value,
    variance_liters: serde_json::Value,
    variance_percentage: serde_json::Value,
    variance_type: String,
    #[serde(default)]
    penalty_amount: serde_json::Value,
    approval_notes: Option<String>,
    approved_at: String,
}

impl TryFrom<ApprovalJson> for ApprovalRecord {
    type Error = StoreError;

    fn try_from(row: ApprovalJson) -> Result<Self, Self::Error> {
        const ENTITY: &str = "milk_approvals";
        Ok(Self {
            id: row.id,
            collection_id: row.collection_id,
            approver_id: row.staff_id,
            received_liters: json_decimal(ENTITY, &row.company_received_liters)?,
            variance_liters: json_decimal(ENTITY, &row.variance_liters)?,
            variance_percentage: json_decimal_opt(ENTITY, &row.variance_percentage)?
                .unwrap_or(Decimal::ZERO),
            variance_type: row
                .variance_type
                .parse()
                .map_err(|e: String| StoreError::decode(ENTITY, e))?,
            penalty_amount: json_decimal_opt(ENTITY, &row.penalty_amount)?.unwrap_or(Decimal::ZERO),
            notes: row.approval_notes,
            approved_at: parse_timestamp(ENTITY, &row.approved_at)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CollectionJson {
    collection_id: String,
    farmer_id: Option<String>,
    staff_id: Option<String>,
    liters: serde_json::Value,
    collection_date: String,
    #[serde(default)]
    fat_content: serde_json::Value,
    #[serde(default)]
    protein_content: serde_json::Value,
    #[serde(default)]
    snf_content: serde_json::Value,
    #[serde(default)]
    acidity_level: serde_json::Value,
    #[serde(default)]
    temperature: serde_json::Value,
    #[serde(default)]
    bacterial_count: serde_json::Value,
}

impl TryFrom<CollectionJson> for CollectionRecord {
    type Error = StoreError;

    fn try_from(row: CollectionJson) -> Result<Self, Self::Error> {
        const ENTITY: &str = "collections";
        let quality = match (
            json_decimal_opt(ENTITY, &row.fat_content)?,
            json_decimal_opt(ENTITY, &row.protein_content)?,
            json_decimal_opt(ENTITY, &row.snf_content)?,
            json_decimal_opt(ENTITY, &row.acidity_level)?,
            json_decimal_opt(ENTITY, &row.temperature)?,
            json_decimal_opt(ENTITY, &row.bacterial_count)?,
        ) {
            (Some(fat), Some(protein), Some(snf), Some(acidity), Some(temp), Some(bacteria)) => {
                Some(QualityMeasurement {
                    fat_content: fat,
                    protein_content: protein,
                    snf_content: snf,
                    acidity_level: acidity,
                    temperature_c: temp,
                    bacterial_count_cfu_ml: bacteria,
                })
            }
            _ => None,
        };

        Ok(Self {
            id: row.collection_id,
            farmer_id: row.farmer_id,
            collector_id: row.staff_id,
            collected_liters: json_decimal(ENTITY, &row.liters)?,
            collection_date: parse_timestamp(ENTITY, &row.collection_date)?,
            quality,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FarmerJson {
    id: String,
    full_name: Option<String>,
}

impl TryFrom<FarmerJson> for Farmer {
    type Error = StoreError;

    fn try_from(row: FarmerJson) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            full_name: row.full_name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProfileJson {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StaffJson {
    id: String,
    #[serde(default)]
    profiles: Option<ProfileJson>,
}

impl TryFrom<StaffJson> for StaffMember {
    type Error = StoreError;

    fn try_from(row: StaffJson) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            full_name: row.profiles.and_then(|p| p.full_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::columns::approvals;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_query_params_render_filters() {
        let query = Query::new()
            .gte(approvals::APPROVED_AT, Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap())
            .eq(approvals::VARIANCE_TYPE, "negative")
            .order_by(approvals::APPROVED_AT, false)
            .page(25, 25);
        let params = query_params(Entity::Approvals, &query);

        assert!(params.contains(&(
            "approved_at".to_string(),
            "gte.2026-05-01T00:00:00.000Z".to_string()
        )));
        assert!(params.contains(&("variance_type".to_string(), "eq.negative".to_string())));
        assert!(params.contains(&("order".to_string(), "approved_at.desc".to_string())));
        assert!(params.contains(&("offset".to_string(), "25".to_string())));
        assert!(params.contains(&("limit".to_string(), "25".to_string())));
    }

    #[test]
    fn test_order_keys_join_in_sequence() {
        let query = Query::new()
            .order_by(approvals::APPROVED_AT, false)
            .order_by(approvals::ID, false);
        let params = query_params(Entity::Approvals, &query);
        assert!(params.contains(&("order".to_string(), "approved_at.desc,id.desc".to_string())));
    }

    #[test]
    fn test_in_filter_quotes_ids() {
        let query = Query::by_ids(Entity::Staff, vec!["s-1".into(), "s,2".into()]);
        let params = query_params(Entity::Staff, &query);
        assert_eq!(params[0], ("select".to_string(), "id,profiles(full_name)".to_string()));
        assert_eq!(params[1], ("id".to_string(), "in.(\"s-1\",\"s,2\")".to_string()));
    }

    #[test]
    fn test_content_range_parsing() {
        assert_eq!(parse_content_range("0-24/342"), Some(342));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }

    #[test]
    fn test_approval_row_accepts_numbers_and_strings() {
        let row: ApprovalJson = serde_json::from_value(serde_json::json!({
            "id": "a-1",
            "collection_id": "COL-1",
            "staff_id": null,
            "company_received_liters": 48.5,
            "variance_liters": "-1.5",
            "variance_percentage": -3,
            "variance_type": "negative",
            "penalty_amount": null,
            "approval_notes": null,
            "approved_at": "2026-05-02T08:00:00+00:00"
        }))
        .unwrap();
        let record = ApprovalRecord::try_from(row).unwrap();
        assert_eq!(record.received_liters, Decimal::new(485, 1));
        assert_eq!(record.variance_liters, Decimal::new(-15, 1));
        assert_eq!(record.penalty_amount, Decimal::ZERO);
        assert!(record.approver_id.is_none());
    }

    #[test]
    fn test_staff_name_from_profile() {
        let row: StaffJson =
            serde_json::from_value(serde_json::json!({"id": "s-1", "profiles": {"full_name": "Mary"}}))
                .unwrap();
        assert_eq!(StaffMember::try_from(row).unwrap().full_name.as_deref(), Some("Mary"));

        let row: StaffJson =
            serde_json::from_value(serde_json::json!({"id": "s-2", "profiles": null})).unwrap();
        assert!(StaffMember::try_from(row).unwrap().full_name.is_none());
    }
}
