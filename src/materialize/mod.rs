//! Client-side relational materialization.
//!
//! A page of approvals carries only foreign keys. The related collections,
//! farmers and staff are fetched in batch, one `id in (...)` request per
//! distinct key set, and stitched back into flat [`VarianceView`] rows.
//! Secondary fetch failures degrade only the affected relation.

pub mod view;

use std::collections::{HashMap, HashSet};
use std::future::Future;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::collection::models::{CollectionRecord, Farmer, StaffMember};
use crate::error::{StoreError, ValidationError};
use crate::store::{Entity, Fetched, Query, RecordStore};
use crate::variance::models::{ApprovalRecord, VarianceType};

pub use view::{CollectionDetails, VarianceView, UNKNOWN_FARMER, UNKNOWN_STAFF};

/// Related entity set joined onto approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Collections,
    Approvers,
    Farmers,
    Collectors,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collections => "collections",
            Self::Approvers => "approvers",
            Self::Farmers => "farmers",
            Self::Collectors => "collectors",
        }
    }
}

/// Composite rows plus the relations that fell back to placeholders.
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub views: Vec<VarianceView>,
    pub degraded: Vec<Relation>,
}

impl Materialized {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Resolve every foreign key on `approvals` into a composite view.
///
/// Output order follows input order. Never fails: a failed secondary fetch is
/// logged and recorded in [`Materialized::degraded`].
pub async fn materialize(store: &dyn RecordStore, approvals: Vec<ApprovalRecord>) -> Materialized {
    let approvals: Vec<ApprovalRecord> = approvals.into_iter().map(sanitize).collect();
    let mut degraded = Vec::new();

    // Stage 1: keys carried by the approvals themselves.
    let collection_query = Query::by_ids(
        Entity::Collections,
        distinct(approvals.iter().map(|a| a.collection_id.as_deref())),
    );
    let approver_query = Query::by_ids(
        Entity::Staff,
        distinct(approvals.iter().map(|a| a.approver_id.as_deref())),
    );

    let (collections, approvers) = tokio::join!(
        settle(&collection_query, store.fetch_collections(&collection_query)),
        settle(&approver_query, store.fetch_staff(&approver_query)),
    );
    let collections = absorb(Relation::Collections, collections, &mut degraded);
    let approvers = absorb(Relation::Approvers, approvers, &mut degraded);

    let collections: HashMap<String, CollectionRecord> =
        collections.into_iter().map(|c| (c.id.clone(), c)).collect();

    // Stage 2: keys only known once collections are in hand.
    let resolved: Vec<&CollectionRecord> = approvals
        .iter()
        .filter_map(|a| collections.get(a.collection_id.as_deref()?))
        .collect();
    let farmer_query = Query::by_ids(
        Entity::Farmers,
        distinct(resolved.iter().map(|c| c.farmer_id.as_deref())),
    );
    let collector_query = Query::by_ids(
        Entity::Staff,
        distinct(resolved.iter().map(|c| c.collector_id.as_deref())),
    );

    let (farmers, collectors) = tokio::join!(
        settle(&farmer_query, store.fetch_farmers(&farmer_query)),
        settle(&collector_query, store.fetch_staff(&collector_query)),
    );
    let farmers = absorb(Relation::Farmers, farmers, &mut degraded);
    let collectors = absorb(Relation::Collectors, collectors, &mut degraded);

    let farmers = names(farmers.into_iter().map(|f: Farmer| (f.id, f.full_name)));
    let approvers = names(approvers.into_iter().map(|s: StaffMember| (s.id, s.full_name)));
    let collectors = names(collectors.into_iter().map(|s: StaffMember| (s.id, s.full_name)));

    let views = approvals
        .into_iter()
        .map(|approval| {
            let collection = approval
                .collection_id
                .as_deref()
                .and_then(|id| collections.get(id));

            let farmer_name = lookup(&farmers, collection.and_then(|c| c.farmer_id.as_deref()))
                .unwrap_or(UNKNOWN_FARMER)
                .to_string();
            let collector_name =
                lookup(&collectors, collection.and_then(|c| c.collector_id.as_deref()))
                    .unwrap_or(UNKNOWN_STAFF)
                    .to_string();
            let approver_name = lookup(&approvers, approval.approver_id.as_deref())
                .unwrap_or(UNKNOWN_STAFF)
                .to_string();

            VarianceView {
                collection: collection.map(|c| CollectionDetails {
                    collection_id: c.id.clone(),
                    collected_liters: c.collected_liters,
                    collection_date: c.collection_date,
                    farmer_id: c.farmer_id.clone(),
                    collector_id: c.collector_id.clone(),
                }),
                approval,
                farmer_name,
                collector_name,
                approver_name,
            }
        })
        .collect();

    Materialized { views, degraded }
}

/// Await a batch fetch unless its id set is empty.
async fn settle<T>(
    query: &Query,
    request: impl Future<Output = Result<Fetched<T>, StoreError>>,
) -> Result<Vec<T>, StoreError> {
    if query.is_unsatisfiable() {
        return Ok(Vec::new());
    }
    request.await.map(|fetched| fetched.rows)
}

fn absorb<T>(
    relation: Relation,
    result: Result<Vec<T>, StoreError>,
    degraded: &mut Vec<Relation>,
) -> Vec<T> {
    match result {
        Ok(rows) => {
            tracing::debug!(relation = relation.as_str(), rows = rows.len(), "Relation fetched");
            rows
        }
        Err(e) => {
            tracing::warn!(
                relation = relation.as_str(),
                error = %e,
                "Relation fetch failed, falling back to placeholders"
            );
            degraded.push(relation);
            Vec::new()
        }
    }
}

/// Distinct non-null keys in first-seen order.
fn distinct<'a>(keys: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.flatten()
        .filter(|k| seen.insert(*k))
        .map(str::to_string)
        .collect()
}

fn names(entries: impl Iterator<Item = (String, Option<String>)>) -> HashMap<String, String> {
    entries
        .filter_map(|(id, name)| Some((id, name.filter(|n| !n.trim().is_empty())?)))
        .collect()
}

fn lookup<'a>(names: &'a HashMap<String, String>, id: Option<&str>) -> Option<&'a str> {
    names.get(id?).map(String::as_str)
}

/// Enforce record invariants on data read back from the store.
fn sanitize(mut approval: ApprovalRecord) -> ApprovalRecord {
    for violation in approval.violations() {
        match violation {
            ValidationError::NegativePenalty(amount) => {
                tracing::warn!(
                    approval_id = %approval.id,
                    penalty = %amount,
                    "Negative penalty on stored approval, clamping to zero"
                );
                approval.penalty_amount = Decimal::ZERO;
            }
            e @ ValidationError::VarianceTypeMismatch { .. } => {
                tracing::warn!(approval_id = %approval.id, error = %e, "Inconsistent approval record");
                approval.variance_type = VarianceType::from_liters(approval.variance_liters);
            }
        }
    }
    approval
}
