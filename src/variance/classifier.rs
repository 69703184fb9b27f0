//! Collected-vs-received variance classification.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::variance::models::{SeverityBand, VarianceType};

/// Result of reconciling a collector's volume against the company's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceClassification {
    pub variance_liters: Decimal,
    /// Percent of the collected volume. Zero when nothing was collected.
    pub variance_percentage: Decimal,
    pub variance_type: VarianceType,
    pub severity: SeverityBand,
}

/// Classify the discrepancy between collected and received volumes.
///
/// # Formula
/// ```text
/// variance_liters     = received - collected
/// variance_percentage = collected == 0 ? 0 : variance_liters / collected * 100
/// ```
pub fn classify(collected_liters: Decimal, received_liters: Decimal) -> VarianceClassification {
    let variance_liters = received_liters - collected_liters;

    let variance_percentage = if collected_liters.is_zero() {
        Decimal::ZERO
    } else {
        variance_liters / collected_liters * dec!(100)
    };

    VarianceClassification {
        variance_liters,
        variance_percentage,
        variance_type: VarianceType::from_liters(variance_liters),
        severity: severity_for(variance_percentage),
    }
}

/// Band a variance percentage by magnitude.
pub fn severity_for(variance_percentage: Decimal) -> SeverityBand {
    let magnitude = variance_percentage.abs();
    if magnitude >= dec!(10) {
        SeverityBand::Severe
    } else if magnitude >= dec!(5) {
        SeverityBand::Moderate
    } else if magnitude > Decimal::ZERO {
        SeverityBand::Mild
    } else {
        SeverityBand::None
    }
}
