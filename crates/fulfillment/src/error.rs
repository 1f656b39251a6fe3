//! Fulfillment error types.

use common::{OrderId, PartId, UserId};
use domain::{CodecError, OrderError};
use event_bus::EventBusError;
use order_store::StoreError;
use thiserror::Error;

/// Coarse classification of a failure.
///
/// Callers branch on the kind: the HTTP layer maps it to a status code and
/// consumers decide between acknowledging and redelivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    UpstreamUnavailable,
    DecodeFailure,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::DecodeFailure => "decode_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the fulfillment services.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Inventory could not resolve some of the requested parts.
    #[error("Parts not found: {}", format_ids(part_ids))]
    PartsNotFound { part_ids: Vec<PartId> },

    /// The user is unknown to the user service.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// The order rejected the operation.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Empty or malformed input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A collaborator call failed.
    #[error("{service} service unavailable: {reason}")]
    Upstream {
        service: &'static str,
        reason: String,
    },

    /// An event payload could not be decoded.
    #[error("Failed to decode event: {0}")]
    Decode(#[from] CodecError),

    /// Order persistence failed.
    #[error("Order store error: {0}")]
    Store(#[from] StoreError),

    /// An event could not be published.
    #[error("Failed to publish event: {0}")]
    Publish(#[from] EventBusError),

    /// Work was abandoned because the service is shutting down.
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

fn format_ids(ids: &[PartId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl FulfillmentError {
    pub fn upstream(service: &'static str, reason: impl Into<String>) -> Self {
        FulfillmentError::Upstream {
            service,
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        FulfillmentError::Validation(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FulfillmentError::OrderNotFound(_)
            | FulfillmentError::PartsNotFound { .. }
            | FulfillmentError::UserNotFound(_) => ErrorKind::NotFound,
            FulfillmentError::Order(err) => match err {
                OrderError::InvalidStateTransition { .. } => ErrorKind::Conflict,
                OrderError::NoParts
                | OrderError::PriceOverflow
                | OrderError::UnknownStatus(_)
                | OrderError::UnknownPaymentMethod(_) => ErrorKind::Validation,
                OrderError::InconsistentRecord { .. } => ErrorKind::Internal,
            },
            FulfillmentError::Validation(_) => ErrorKind::Validation,
            FulfillmentError::Upstream { .. } | FulfillmentError::Publish(_) => {
                ErrorKind::UpstreamUnavailable
            }
            FulfillmentError::Decode(_) => ErrorKind::DecodeFailure,
            FulfillmentError::Store(err) => match err {
                StoreError::OrderNotFound(_) => ErrorKind::NotFound,
                StoreError::DuplicateOrder(_) | StoreError::ConcurrencyConflict { .. } => {
                    ErrorKind::Conflict
                }
                StoreError::Corrupt(_) | StoreError::Database(_) | StoreError::Migration(_) => {
                    ErrorKind::Internal
                }
            },
            FulfillmentError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::OrderStatus;

    #[test]
    fn test_kinds() {
        let order_id = OrderId::new();

        assert_eq!(
            FulfillmentError::OrderNotFound(order_id).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            FulfillmentError::PartsNotFound { part_ids: vec![] }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            FulfillmentError::from(OrderError::InvalidStateTransition {
                order_id,
                current_status: OrderStatus::Paid,
                action: "cancel",
            })
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            FulfillmentError::from(OrderError::NoParts).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            FulfillmentError::upstream("payment", "declined").kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            FulfillmentError::from(CodecError::Truncated { len: 1 }).kind(),
            ErrorKind::DecodeFailure
        );
        assert_eq!(
            FulfillmentError::from(StoreError::ConcurrencyConflict {
                order_id,
                expected: 1,
                actual: 2,
            })
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(FulfillmentError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_parts_not_found_lists_ids() {
        let first = PartId::new();
        let second = PartId::new();
        let err = FulfillmentError::PartsNotFound {
            part_ids: vec![first, second],
        };
        assert_eq!(
            err.to_string(),
            format!("Parts not found: {first}, {second}")
        );
    }

    #[test]
    fn test_upstream_message() {
        let err = FulfillmentError::upstream("inventory", "connection refused");
        assert_eq!(
            err.to_string(),
            "inventory service unavailable: connection refused"
        );
    }
}
