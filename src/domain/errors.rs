use thiserror::Error;

use super::order::OrderStatus;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Order not found")]
    NotFound,
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),
    #[error("Payment provider error: {0}")]
    Provider(String),
    #[error("Internal error: {0}")]
    Internal(String),
}
