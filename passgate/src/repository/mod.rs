//! Pass persistence.
//!
//! Every state-changing method is a compare-and-set: it only writes when the
//! stored record is still in the state the caller observed, and reports what
//! it found otherwise. This is what makes redemption single-use under
//! concurrent scans.

use crate::types::{
    PassRecord, PassRef, QrToken, Redemption, Subscription, SubscriptionId, SubscriptionStatus,
    Ticket, TicketId, TicketStatus, UserId,
};
use crate::verification::{self, Rejection, Verdict};
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryPassRepository;
pub use postgres::PostgresPassRepository;

/// Errors from repository operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Backend failure (connection, query, constraint)
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record with this ID already exists
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// The token is already attached to another record
    #[error("QR token already in use")]
    TokenConflict,

    /// A stored row could not be mapped back to a domain record
    #[error("Corrupt record {id}: {reason}")]
    Corrupt {
        /// Row ID
        id: String,
        /// What was wrong
        reason: String,
    },
}

/// Result of [`PassRepository::attach_token`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The token was written
    Attached,
    /// A token was already present; it is returned unchanged
    AlreadyIssued {
        /// Stored token
        token: QrToken,
        /// Stored payload
        data: String,
    },
    /// No record with this ID belongs to the owner
    NotFound,
}

/// Result of [`PassRepository::mark_redeemed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// The latch was set by this call
    Redeemed,
    /// The latch was already set; carries the existing marker
    AlreadyRedeemed(Redemption),
    /// The stored ticket no longer admits entry at the redemption time
    Rejected(Rejection),
    /// No such ticket
    NotFound,
}

/// Outcome for a ticket whose latch could not be set at `at`, judged on the
/// stored row. `None` means the row still admits entry.
pub(crate) fn refusal(ticket: &Ticket, at: DateTime<Utc>) -> Option<RedeemOutcome> {
    match verification::evaluate_ticket(ticket, at) {
        Verdict::Accepted => None,
        Verdict::Rejected(Rejection::AlreadyRedeemed { redemption }) => {
            Some(RedeemOutcome::AlreadyRedeemed(redemption))
        },
        Verdict::Rejected(rejection) => Some(RedeemOutcome::Rejected(rejection)),
    }
}

/// Storage for tickets and subscriptions
#[async_trait]
pub trait PassRepository: Send + Sync {
    /// Insert a new ticket
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), RepositoryError>;

    /// Insert a new subscription
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError>;

    /// Load a record by ID
    async fn find(&self, pass: PassRef) -> Result<Option<PassRecord>, RepositoryError>;

    /// Load the record carrying `token`, searching tickets then subscriptions
    async fn find_by_token(
        &self,
        token: &QrToken,
    ) -> Result<Option<PassRecord>, RepositoryError>;

    /// All records owned by `owner`, newest first
    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<PassRecord>, RepositoryError>;

    /// Attach `token` and `data` if the record belongs to `owner` and has no
    /// token yet
    async fn attach_token(
        &self,
        pass: PassRef,
        owner: UserId,
        token: &QrToken,
        data: &str,
    ) -> Result<AttachOutcome, RepositoryError>;

    /// Set the redemption latch if it is not set yet and the stored ticket
    /// still admits entry at `redemption.used_at`
    async fn mark_redeemed(
        &self,
        ticket: TicketId,
        redemption: &Redemption,
    ) -> Result<RedeemOutcome, RepositoryError>;

    /// Clear the redemption latch. Returns `false` if it was not set.
    async fn reset_redemption(&self, ticket: TicketId) -> Result<bool, RepositoryError>;

    /// Change a ticket's status if it is still `from`
    async fn update_ticket_status(
        &self,
        ticket: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    ) -> Result<bool, RepositoryError>;

    /// Change a subscription's status if it is still `from`
    async fn update_subscription_status(
        &self,
        subscription: SubscriptionId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool, RepositoryError>;

    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), RepositoryError>;
}
