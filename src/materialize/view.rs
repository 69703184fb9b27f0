use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::variance::models::ApprovalRecord;

/// Placeholder for a farmer that could not be resolved.
pub const UNKNOWN_FARMER: &str = "Unknown Farmer";
/// Placeholder for a collector or approver that could not be resolved.
pub const UNKNOWN_STAFF: &str = "Unknown Staff";

/// Collector-side details of the approved collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionDetails {
    pub collection_id: String,
    pub collected_liters: Decimal,
    pub collection_date: DateTime<Utc>,
    pub farmer_id: Option<String>,
    pub collector_id: Option<String>,
}

/// Denormalized approval row with every related name resolved.
///
/// Flat enough to hand straight to an exporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceView {
    #[serde(flatten)]
    pub approval: ApprovalRecord,
    /// `None` when the collection could not be fetched or does not exist.
    pub collection: Option<CollectionDetails>,
    pub farmer_name: String,
    pub collector_name: String,
    pub approver_name: String,
}

impl VarianceView {
    pub fn collector_id(&self) -> Option<&str> {
        self.collection.as_ref()?.collector_id.as_deref()
    }

    pub fn collection_id(&self) -> Option<&str> {
        self.approval.collection_id.as_deref()
    }

    /// Case-insensitive match on collection id and every resolved name.
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }

        let mut haystacks = vec![
            self.farmer_name.as_str(),
            self.collector_name.as_str(),
            self.approver_name.as_str(),
        ];
        if let Some(id) = self.collection_id() {
            haystacks.push(id);
        }

        haystacks
            .iter()
            .any(|h| h.to_lowercase().contains(&term))
    }
}
