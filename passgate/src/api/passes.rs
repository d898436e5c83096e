//! Owner pass listing.
//!
//! - GET /api/passes - The caller's tickets and subscriptions, newest first

use crate::server::state::AppState;
use crate::session::Session;
use crate::types::{PassRecord, Subscription, Ticket};
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use passgate_web::AppError;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Response Types
// ============================================================================

/// Read-only ticket metadata.
#[derive(Debug, Clone, Serialize)]
pub struct TicketInfo {
    /// Ticket ID
    pub id: Uuid,
    /// Event label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Amount in minor units
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Formatted price, e.g. `25.00 EUR`
    pub price: String,
    /// Status
    pub status: &'static str,
    /// Validity boundary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&Ticket> for TicketInfo {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: *ticket.id.as_uuid(),
            event_name: ticket.event_name.clone(),
            amount: ticket.amount.amount,
            currency: ticket.amount.currency.clone(),
            price: ticket.amount.to_string(),
            status: ticket.status.as_str(),
            valid_until: ticket.valid_until,
            created_at: ticket.created_at,
        }
    }
}

/// Read-only subscription metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    /// Subscription ID
    pub id: Uuid,
    /// Plan label
    pub plan: String,
    /// Status
    pub status: &'static str,
    /// End of the paid period
    pub current_period_end: DateTime<Utc>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionInfo {
    fn from(subscription: &Subscription) -> Self {
        Self {
            id: *subscription.id.as_uuid(),
            plan: subscription.plan.clone(),
            status: subscription.status.as_str(),
            current_period_end: subscription.current_period_end,
            created_at: subscription.created_at,
        }
    }
}

/// Either kind of pass, tagged with `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassView {
    /// A ticket
    Ticket(TicketInfo),
    /// A subscription
    Subscription(SubscriptionInfo),
}

impl From<&PassRecord> for PassView {
    fn from(record: &PassRecord) -> Self {
        match record {
            PassRecord::Ticket(ticket) => Self::Ticket(ticket.into()),
            PassRecord::Subscription(subscription) => Self::Subscription(subscription.into()),
        }
    }
}

/// One entry in the owner's listing.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    /// Pass metadata
    #[serde(flatten)]
    pub pass: PassView,
    /// Token, once issued
    pub qr_code_token: Option<String>,
    /// When the ticket was redeemed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    /// Who redeemed the ticket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<String>,
}

impl From<&PassRecord> for PassSummary {
    fn from(record: &PassRecord) -> Self {
        let redemption = match record {
            PassRecord::Ticket(ticket) => ticket.redemption.as_ref(),
            PassRecord::Subscription(_) => None,
        };
        Self {
            pass: record.into(),
            qr_code_token: record.token().map(|token| token.as_str().to_string()),
            used_at: redemption.map(|r| r.used_at),
            used_by: redemption.map(|r| r.used_by.clone()),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List the caller's passes.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/api/passes \
///   -H "X-User-Id: 550e8400-e29b-41d4-a716-446655440000"
/// ```
///
/// Response:
/// ```json
/// [
///   {
///     "type": "ticket",
///     "id": "660e8400-e29b-41d4-a716-446655440001",
///     "amount": 2500,
///     "currency": "EUR",
///     "price": "25.00 EUR",
///     "status": "paid",
///     "created_at": "2025-01-01T00:00:00Z",
///     "qr_code_token": null
///   }
/// ]
/// ```
///
/// # Errors
///
/// - 401 Unauthorized: Missing session headers
pub async fn list(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<PassSummary>>, AppError> {
    let records = state.service.list_passes(&session).await?;
    Ok(Json(records.iter().map(PassSummary::from).collect()))
}
