use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::variance::penalty::validate_penalty;

/// Direction of a collected-vs-received discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceType {
    /// The company received more than the collector recorded.
    Positive,
    /// The company received less than the collector recorded.
    Negative,
    None,
}

impl VarianceType {
    pub fn from_liters(variance_liters: Decimal) -> Self {
        if variance_liters > Decimal::ZERO {
            Self::Positive
        } else if variance_liters < Decimal::ZERO {
            Self::Negative
        } else {
            Self::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::None => "none",
        }
    }
}

impl fmt::Display for VarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VarianceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "none" => Ok(Self::None),
            other => Err(format!("unknown variance type '{other}'")),
        }
    }
}

/// Magnitude band of a variance percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBand {
    None,
    Mild,
    Moderate,
    Severe,
}

impl fmt::Display for SeverityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Mild => write!(f, "mild"),
            Self::Moderate => write!(f, "moderate"),
            Self::Severe => write!(f, "severe"),
        }
    }
}

/// Company-side confirmation of a collection. Read-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub collection_id: Option<String>,
    /// Office staff member who recorded the approval.
    pub approver_id: Option<String>,
    pub received_liters: Decimal,
    pub variance_liters: Decimal,
    pub variance_percentage: Decimal,
    pub variance_type: VarianceType,
    pub penalty_amount: Decimal,
    pub notes: Option<String>,
    pub approved_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// Check the invariants a stored record must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.violations().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Every invariant this record breaks, checked independently.
    pub fn violations(&self) -> Vec<ValidationError> {
        let mut found = Vec::new();
        if let Err(e) = validate_penalty(self.penalty_amount) {
            found.push(e);
        }
        if VarianceType::from_liters(self.variance_liters) != self.variance_type {
            found.push(ValidationError::VarianceTypeMismatch {
                recorded: self.variance_type.to_string(),
                liters: self.variance_liters,
            });
        }
        found
    }
}
