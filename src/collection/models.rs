use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Producer-supplied milk quality readings for one collection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMeasurement {
    /// Fat content in percent.
    pub fat_content: Decimal,
    /// Protein content in percent.
    pub protein_content: Decimal,
    /// Solids-not-fat in percent.
    pub snf_content: Decimal,
    /// Titratable acidity. Recorded but not part of the quality score.
    pub acidity_level: Decimal,
    pub temperature_c: Decimal,
    pub bacterial_count_cfu_ml: Decimal,
}

/// A single farmer pickup as recorded by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    pub farmer_id: Option<String>,
    /// Staff member who physically collected the milk.
    pub collector_id: Option<String>,
    pub collected_liters: Decimal,
    pub collection_date: DateTime<Utc>,
    pub quality: Option<QualityMeasurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farmer {
    pub id: String,
    pub full_name: Option<String>,
}

/// A cooperative staff member (collector or office approver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: String,
    pub full_name: Option<String>,
}
