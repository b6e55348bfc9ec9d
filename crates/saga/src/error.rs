//! Saga error types.

use std::time::Duration;

use common::OrderId;
use domain::RepositoryError;
use messaging::MessagingError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("good is out of stock")]
    GoodOutOfStock,

    #[error("no working parcel automats available")]
    NoWorkingAutomats,

    #[error("no available cell for good dimensions")]
    NoAvailableCell,

    #[error("order does not belong to user")]
    OrderNotOwned,

    #[error("order cannot be returned")]
    OrderNotReturnable,

    #[error("invalid delivery status: {0}")]
    InvalidDeliveryStatus(String),

    /// A batch request produced no order and no other error to report.
    #[error("failed to create any orders")]
    NoOrdersCreated,

    #[error("no delivery for order {0}")]
    DeliveryNotFound(OrderId),

    /// Some cells in a pickup could not be freed or their order completed.
    #[error("pickup failed for {failed} of {total} cells")]
    PartialPickupFailure { failed: usize, total: usize },

    /// A notification could not be sent.
    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl SagaError {
    /// Returns true for validation and precondition failures.
    ///
    /// These are reported to the caller as-is and never retried.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SagaError::GoodOutOfStock
                | SagaError::NoWorkingAutomats
                | SagaError::NoAvailableCell
                | SagaError::OrderNotOwned
                | SagaError::OrderNotReturnable
                | SagaError::InvalidDeliveryStatus(_)
                | SagaError::NoOrdersCreated
        )
    }

    /// Returns true if a requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            SagaError::DeliveryNotFound(_) => true,
            SagaError::Repository(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::GoodOutOfStock => "out_of_stock",
            SagaError::NoWorkingAutomats => "no_working_automats",
            SagaError::NoAvailableCell => "no_available_cell",
            SagaError::OrderNotOwned => "not_owned",
            SagaError::OrderNotReturnable => "not_returnable",
            SagaError::InvalidDeliveryStatus(_) => "invalid_status",
            SagaError::NoOrdersCreated => "no_orders",
            SagaError::DeliveryNotFound(_) => "not_found",
            SagaError::PartialPickupFailure { .. } => "partial_pickup",
            SagaError::Notification(_) => "notification",
            SagaError::Repository(_) => "repository",
            SagaError::Messaging(_) => "messaging",
            SagaError::Serialization(_) => "serialization",
            SagaError::Timeout(_) => "timeout",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(SagaError::GoodOutOfStock.is_precondition());
        assert!(SagaError::InvalidDeliveryStatus("lost".into()).is_precondition());
        assert!(!SagaError::Messaging(MessagingError::PublishTimeout).is_precondition());
        assert!(
            !SagaError::Repository(RepositoryError::Unavailable("down".into())).is_precondition()
        );
    }

    #[test]
    fn test_not_found_classification() {
        let err = SagaError::Repository(RepositoryError::NotFound {
            entity: "order",
            id: "42".into(),
        });
        assert!(err.is_not_found());
        assert!(SagaError::DeliveryNotFound(OrderId::new()).is_not_found());
        assert!(!SagaError::OrderNotOwned.is_not_found());
    }
}
