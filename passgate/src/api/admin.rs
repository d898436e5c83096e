//! Administration endpoints (admin session required).
//!
//! - POST /api/admin/tickets - Register a ticket after payment
//! - POST /api/admin/subscriptions - Register a subscription
//! - PUT /api/admin/tickets/:id/status - Change a ticket's status
//! - PUT /api/admin/subscriptions/:id/status - Change a subscription's status
//! - POST /api/admin/tickets/:id/reset - Clear a ticket's redemption

use super::passes::PassSummary;
use crate::app::{NewSubscription, NewTicket};
use crate::server::state::AppState;
use crate::session::Session;
use crate::types::{
    Money, PassRecord, SubscriptionId, SubscriptionStatus, TicketId, TicketStatus, UserId,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use passgate_web::AppError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to register a ticket.
#[derive(Debug, Deserialize)]
pub struct RegisterTicketRequest {
    /// Owning user
    pub owner_id: Uuid,
    /// Amount in minor units
    pub amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Initial status (default `paid`)
    pub status: Option<String>,
    /// Event label
    pub event_name: Option<String>,
    /// Validity boundary
    pub valid_until: Option<DateTime<Utc>>,
}

/// Request to register a subscription.
#[derive(Debug, Deserialize)]
pub struct RegisterSubscriptionRequest {
    /// Owning user
    pub owner_id: Uuid,
    /// Plan label
    pub plan: String,
    /// Initial status (default `active`)
    pub status: Option<String>,
    /// End of the paid period
    pub current_period_end: DateTime<Utc>,
}

/// Request to change a status.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    /// New status wire name
    pub status: String,
}

/// Response after a redemption reset.
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Ticket ID
    pub ticket_id: Uuid,
    /// Redemption time that was cleared
    pub previous_used_at: DateTime<Utc>,
    /// Validator that was cleared
    pub previous_used_by: String,
}

fn parse_status<T>(raw: Option<&str>, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |value| {
        value
            .trim()
            .parse()
            .map_err(|e: T::Err| AppError::bad_request(e.to_string()))
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a ticket.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/admin/tickets \
///   -H "X-User-Id: 880e8400-e29b-41d4-a716-446655440003" \
///   -H "X-User-Role: admin" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "owner_id": "550e8400-e29b-41d4-a716-446655440000",
///     "amount": 2500,
///     "currency": "EUR",
///     "event_name": "Summer Social",
///     "valid_until": "2025-06-02T04:00:00Z"
///   }'
/// ```
///
/// # Errors
///
/// - 400 Bad Request: Unknown status, negative amount or bad currency
/// - 403 Forbidden: Not an admin
pub async fn register_ticket(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<RegisterTicketRequest>,
) -> Result<(StatusCode, Json<PassSummary>), AppError> {
    let status = parse_status(request.status.as_deref(), TicketStatus::Paid)?;
    let ticket = state
        .service
        .register_ticket(
            &session,
            NewTicket {
                owner: UserId::from_uuid(request.owner_id),
                amount: Money::new(request.amount, request.currency),
                status,
                event_name: request.event_name,
                valid_until: request.valid_until,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PassSummary::from(&PassRecord::Ticket(ticket))),
    ))
}

/// Register a subscription.
///
/// # Errors
///
/// - 400 Bad Request: Unknown status or empty plan
/// - 403 Forbidden: Not an admin
pub async fn register_subscription(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<RegisterSubscriptionRequest>,
) -> Result<(StatusCode, Json<PassSummary>), AppError> {
    let status = parse_status(request.status.as_deref(), SubscriptionStatus::Active)?;
    let subscription = state
        .service
        .register_subscription(
            &session,
            NewSubscription {
                owner: UserId::from_uuid(request.owner_id),
                plan: request.plan,
                status,
                current_period_end: request.current_period_end,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PassSummary::from(&PassRecord::Subscription(subscription))),
    ))
}

/// Change a ticket's status.
///
/// # Example
///
/// ```bash
/// curl -X PUT http://localhost:8080/api/admin/tickets/660e8400-e29b-41d4-a716-446655440001/status \
///   -H "X-User-Id: 880e8400-e29b-41d4-a716-446655440003" \
///   -H "X-User-Role: admin" \
///   -H "Content-Type: application/json" \
///   -d '{"status": "refunded"}'
/// ```
///
/// # Errors
///
/// - 400 Bad Request: Unknown status
/// - 403 Forbidden: Not an admin
/// - 404 Not Found: No such ticket
/// - 409 Conflict: Transition not allowed
pub async fn update_ticket_status(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<PassSummary>, AppError> {
    let status = request
        .status
        .trim()
        .parse::<TicketStatus>()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let ticket = state
        .service
        .update_ticket_status(&session, TicketId::from_uuid(id), status)
        .await?;
    Ok(Json(PassSummary::from(&PassRecord::Ticket(ticket))))
}

/// Change a subscription's status.
///
/// # Errors
///
/// Same as [`update_ticket_status`].
pub async fn update_subscription_status(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<PassSummary>, AppError> {
    let status = request
        .status
        .trim()
        .parse::<SubscriptionStatus>()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let subscription = state
        .service
        .update_subscription_status(&session, SubscriptionId::from_uuid(id), status)
        .await?;
    Ok(Json(PassSummary::from(&PassRecord::Subscription(subscription))))
}

/// Clear a ticket's redemption so it can be scanned again.
///
/// Audit-logged with the admin's ID.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/admin/tickets/660e8400-e29b-41d4-a716-446655440001/reset \
///   -H "X-User-Id: 880e8400-e29b-41d4-a716-446655440003" \
///   -H "X-User-Role: admin"
/// ```
///
/// # Errors
///
/// - 403 Forbidden: Not an admin
/// - 404 Not Found: No such ticket
/// - 409 Conflict: Ticket was not redeemed
pub async fn reset_redemption(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Result<Json<ResetResponse>, AppError> {
    let previous = state
        .service
        .reset_redemption(&session, TicketId::from_uuid(id))
        .await?;

    Ok(Json(ResetResponse {
        ticket_id: id,
        previous_used_at: previous.used_at,
        previous_used_by: previous.used_by,
    }))
}
