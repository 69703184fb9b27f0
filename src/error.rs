use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

/// Failure talking to the backing record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store API {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed {entity} row: {reason}")]
    Decode { entity: &'static str, reason: String },

    #[error("unknown field '{field}' on {entity}")]
    UnknownField { entity: &'static str, field: String },
}

impl StoreError {
    pub(crate) fn decode(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::Decode {
            entity,
            reason: reason.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }

    /// Whether the write collided with a uniqueness constraint.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(e)) => e.is_unique_violation(),
            Self::Api { status, .. } => *status == 409,
            _ => false,
        }
    }
}

/// Failure of a report request. Only the primary record fetch can produce one.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to fetch variance records: {0}")]
    Fetch(#[from] StoreError),

    #[error("variance record fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// A record that violates an invariant at the materializer boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("penalty amount must be non-negative, got {0}")]
    NegativePenalty(Decimal),

    #[error("variance type {recorded} does not match variance of {liters} liters")]
    VarianceTypeMismatch { recorded: String, liters: Decimal },
}

/// Failure recording a company-side approval.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("collection {0} not found")]
    CollectionNotFound(String),

    #[error("collection {0} is already approved")]
    AlreadyApproved(String),

    #[error("received volume must be non-negative, got {0}")]
    NegativeVolume(Decimal),

    #[error("collection {collection_id} weighed {hours_late}h after the allowed {max_delay_hours}h")]
    LateWeighing {
        collection_id: String,
        max_delay_hours: i64,
        hours_late: i64,
    },
}
