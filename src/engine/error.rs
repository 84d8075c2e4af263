use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, ItemId, Span};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("item {item_id} unavailable: {} conflicting range(s)", .conflicts.len())]
    Conflict { item_id: ItemId, conflicts: Vec<Span> },
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("blackout not found: {0}")]
    BlackoutNotFound(Ulid),
    #[error("unknown add-on: {0}")]
    UnknownAddOn(String),
    #[error("pricing unavailable: {0}")]
    PricingUnavailable(String),
    #[error("booking {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    Journal(String),
}

impl EngineError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation",
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::Conflict { .. } => "conflict",
            EngineError::ItemNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::BlackoutNotFound(_) => "not_found",
            EngineError::UnknownAddOn(_) => "unknown_add_on",
            EngineError::PricingUnavailable(_) => "pricing_unavailable",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Journal(_) => "internal",
        }
    }

    /// Transient collaborator failures may be retried after backoff; everything
    /// else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownAddOn(_) | EngineError::PricingUnavailable(_)
        )
    }
}
