//! Operation failures.
//!
//! A token that does not admit entry is not an error; see
//! [`crate::verification::Rejection`].

use crate::repository::RepositoryError;
use crate::types::{PassKind, TicketId};
use passgate_runtime::StoreError;
use passgate_web::AppError;
use thiserror::Error;

/// Errors returned by pass operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    /// No record for the ID or token, or the record belongs to someone else
    #[error("{0} not found")]
    NotFound(String),

    /// The session's role does not allow the operation
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// A mutation was rejected by storage after the decision was made
    ///
    /// Issuing is safe to retry: the minted token was never attached.
    #[error("Failed to persist {0}")]
    WriteFailed(String),

    /// Malformed input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Status change not allowed from the current status
    #[error("Cannot change {kind} status from {from} to {to}")]
    InvalidTransition {
        /// Record kind
        kind: PassKind,
        /// Current status
        from: &'static str,
        /// Requested status
        to: &'static str,
    },

    /// Reset requested for a ticket that was never redeemed
    #[error("Ticket {0} has not been redeemed")]
    NotRedeemed(TicketId),

    /// Backend failure while loading or running the operation
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for PassError {
    fn from(err: RepositoryError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<StoreError> for PassError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<PassError> for AppError {
    fn from(err: PassError) -> Self {
        match &err {
            PassError::NotFound(_) => Self::new(
                axum::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                err.to_string(),
            ),
            PassError::Unauthorized(_) => Self::forbidden(err.to_string()),
            PassError::InvalidRequest(_) => Self::bad_request(err.to_string()),
            PassError::InvalidTransition { .. } | PassError::NotRedeemed(_) => {
                Self::conflict(err.to_string())
            },
            PassError::WriteFailed(_) | PassError::Storage(_) => {
                let message = err.to_string();
                Self::internal("The operation could not be completed, please retry")
                    .with_source(anyhow::anyhow!(message))
            },
        }
    }
}
