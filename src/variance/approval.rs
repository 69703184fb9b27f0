//! Company-side approval of a collection.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::collection::models::CollectionRecord;
use crate::error::ApprovalError;
use crate::store::{columns, Entity, Query, RecordStore};
use crate::variance::classifier::classify;
use crate::variance::models::ApprovalRecord;
use crate::variance::penalty::PenaltySchedule;

/// Company-side weighing of one collection.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub collection_id: String,
    pub received_liters: Decimal,
    pub approver_id: String,
    pub notes: Option<String>,
}

/// Build the approval record for a collection the company has weighed.
///
/// Variance is reconciled against the collector's volume and the penalty is
/// assessed from `schedule`.
pub fn draft_approval(
    collection: &CollectionRecord,
    received_liters: Decimal,
    approver_id: &str,
    notes: Option<String>,
    schedule: &PenaltySchedule,
    approved_at: DateTime<Utc>,
) -> ApprovalRecord {
    let variance = classify(collection.collected_liters, received_liters);
    let penalty_amount = schedule.assess(&variance);

    tracing::debug!(
        collection_id = %collection.id,
        variance_liters = %variance.variance_liters,
        variance_type = %variance.variance_type,
        severity = %variance.severity,
        penalty = %penalty_amount,
        "Approval drafted"
    );

    ApprovalRecord {
        id: Uuid::new_v4().to_string(),
        collection_id: Some(collection.id.clone()),
        approver_id: Some(approver_id.to_string()),
        received_liters,
        variance_liters: variance.variance_liters,
        variance_percentage: variance.variance_percentage,
        variance_type: variance.variance_type,
        penalty_amount,
        notes,
        approved_at,
    }
}

/// Whether the company weighed the milk soon enough after collection.
pub fn weighed_in_time(
    collection_date: DateTime<Utc>,
    weighed_at: DateTime<Utc>,
    max_delay_hours: i64,
) -> bool {
    weighed_at - collection_date <= Duration::hours(max_delay_hours)
}

/// Reconcile a collection against the received volume and persist the approval.
///
/// A collection is approved at most once and must be weighed within
/// `max_delay_hours` of collection. The uniqueness check is repeated by the
/// store on insert, so a concurrent approval still surfaces as
/// [`ApprovalError::AlreadyApproved`].
pub async fn approve_collection(
    store: &dyn RecordStore,
    request: ApprovalRequest,
    schedule: &PenaltySchedule,
    max_delay_hours: i64,
) -> Result<ApprovalRecord, ApprovalError> {
    if request.received_liters < Decimal::ZERO {
        return Err(ApprovalError::NegativeVolume(request.received_liters));
    }

    let lookup = Query::by_ids(Entity::Collections, vec![request.collection_id.clone()]);
    let collection = store
        .fetch_collections(&lookup)
        .await?
        .rows
        .into_iter()
        .next()
        .ok_or_else(|| ApprovalError::CollectionNotFound(request.collection_id.clone()))?;

    let now = Utc::now();
    if !weighed_in_time(collection.collection_date, now, max_delay_hours) {
        let hours_late = (now - collection.collection_date).num_hours();
        tracing::warn!(
            collection_id = %collection.id,
            approver_id = %request.approver_id,
            collected_at = %collection.collection_date,
            hours_late,
            max_delay_hours,
            "Late weighing rejected"
        );
        return Err(ApprovalError::LateWeighing {
            collection_id: collection.id,
            max_delay_hours,
            hours_late,
        });
    }

    let existing = Query::new()
        .eq(columns::approvals::COLLECTION_ID, request.collection_id.as_str())
        .page(0, 1);
    if !store.fetch_approvals(&existing).await?.rows.is_empty() {
        return Err(ApprovalError::AlreadyApproved(request.collection_id));
    }

    let approval = draft_approval(
        &collection,
        request.received_liters,
        &request.approver_id,
        request.notes,
        schedule,
        now,
    );
    match store.insert_approval(&approval).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => return Err(ApprovalError::AlreadyApproved(collection.id)),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        approval_id = %approval.id,
        collection_id = %collection.id,
        variance_type = %approval.variance_type,
        penalty = %approval.penalty_amount,
        store = store.name(),
        "Approval recorded"
    );
    Ok(approval)
}

/// Outcome of one request within a batch.
pub type BatchOutcome = (String, Result<ApprovalRecord, ApprovalError>);

/// Approve several collections in order.
///
/// A failed request does not stop the batch; every request gets an outcome,
/// in input order.
pub async fn approve_batch(
    store: &dyn RecordStore,
    requests: Vec<ApprovalRequest>,
    schedule: &PenaltySchedule,
    max_delay_hours: i64,
) -> Vec<BatchOutcome> {
    let mut outcomes = Vec::with_capacity(requests.len());

    for request in requests {
        let collection_id = request.collection_id.clone();
        let result = approve_collection(store, request, schedule, max_delay_hours).await;
        if let Err(e) = &result {
            tracing::warn!(collection_id = %collection_id, error = %e, "Batch approval entry failed");
        }
        outcomes.push((collection_id, result));
    }

    let approved = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
    tracing::info!(
        approved,
        failed = outcomes.len() - approved,
        "Batch approval finished"
    );
    outcomes
}

/// Whether every request in a batch was approved.
pub fn all_approved(outcomes: &[BatchOutcome]) -> bool {
    outcomes.iter().all(|(_, r)| r.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variance::models::VarianceType;
    use crate::variance::penalty::PenaltyRule;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn collection() -> CollectionRecord {
        CollectionRecord {
            id: "COL-001".to_string(),
            farmer_id: Some("f-1".to_string()),
            collector_id: Some("s-1".to_string()),
            collected_liters: dec!(40),
            collection_date: Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap(),
            quality: None,
        }
    }

    #[test]
    fn test_draft_reconciles_and_assesses() {
        let schedule = PenaltySchedule::new(vec![PenaltyRule {
            variance_type: VarianceType::Negative,
            min_variance_percentage: dec!(0),
            max_variance_percentage: dec!(100),
            rate_per_liter: dec!(3),
            active: true,
        }]);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let approval = draft_approval(&collection(), dec!(38), "s-9", None, &schedule, now);

        assert_eq!(approval.collection_id.as_deref(), Some("COL-001"));
        assert_eq!(approval.approver_id.as_deref(), Some("s-9"));
        assert_eq!(approval.variance_liters, dec!(-2));
        assert_eq!(approval.variance_percentage, dec!(-5));
        assert_eq!(approval.variance_type, VarianceType::Negative);
        assert_eq!(approval.penalty_amount, dec!(6));
        assert_eq!(approval.approved_at, now);
        assert!(approval.validate().is_ok());
    }

    #[test]
    fn test_weighing_window() {
        let collected = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        assert!(weighed_in_time(collected, collected + Duration::hours(24), 24));
        assert!(!weighed_in_time(collected, collected + Duration::hours(25), 24));
        assert!(weighed_in_time(collected, collected + Duration::minutes(30), 24));
    }
}
