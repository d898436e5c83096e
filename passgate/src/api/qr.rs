//! QR token endpoints.
//!
//! - POST /api/qr/issue - Return (and on first call attach) a pass's token
//! - POST /api/qr/validate - Check a scanned token, optionally redeeming it
//! - GET /api/qr/public - Read-only landing page data behind the QR URL
//!
//! # Token Lifecycle
//!
//! ```text
//! unissued ──issue──▶ issued ──validate (mark_as_used)──▶ redeemed
//! ```
//!
//! A token that does not admit entry is answered with `200 { valid: false }`
//! and a human-readable `reason`, never with an error status.

use super::passes::{SubscriptionInfo, TicketInfo};
use crate::app::Verification;
use crate::metrics::outcome_label;
use crate::server::state::AppState;
use crate::session::Session;
use crate::types::{PassKind, PassRecord, PassRef, QrToken, SubscriptionId, TicketId};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use passgate_web::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to issue a token. Exactly one ID must be set.
#[derive(Debug, Default, Deserialize)]
pub struct IssueRequest {
    /// Ticket to issue for
    pub ticket_id: Option<Uuid>,
    /// Subscription to issue for
    pub subscription_id: Option<Uuid>,
}

impl IssueRequest {
    /// The record this request targets
    ///
    /// # Errors
    ///
    /// Returns 400 unless exactly one of the IDs is set.
    pub fn pass_ref(&self) -> Result<PassRef, AppError> {
        match (self.ticket_id, self.subscription_id) {
            (Some(id), None) => Ok(PassRef::Ticket(TicketId::from_uuid(id))),
            (None, Some(id)) => Ok(PassRef::Subscription(SubscriptionId::from_uuid(id))),
            _ => Err(AppError::bad_request(
                "Exactly one of ticket_id or subscription_id is required",
            )),
        }
    }
}

/// Token and everything a client needs to render it.
#[derive(Debug, Serialize)]
pub struct IssueResponse {
    /// Opaque token
    pub qr_code_token: String,
    /// Serialized payload
    pub qr_code_data: String,
    /// Record kind
    #[serde(rename = "type")]
    pub kind: PassKind,
    /// Verification URL encoded into the QR image
    pub verify_url: String,
    /// Ticket landing page URL
    pub ticket_url: String,
}

/// Request to validate a scanned token.
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    /// Scanned token
    pub qr_code_token: String,
    /// Recorded as `used_by`; defaults to the caller's display name
    pub validator_name: Option<String>,
    /// Redeem instead of only checking
    #[serde(default)]
    pub mark_as_used: bool,
}

/// Query for the public view.
#[derive(Debug, Deserialize)]
pub struct PublicQuery {
    /// Token from the QR URL
    pub qr_code_token: String,
}

/// Validation result.
#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    /// Whether the token admits entry
    pub valid: bool,
    /// Why not, when `valid` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine-readable outcome (`accepted`, `already_redeemed`, ...)
    pub code: &'static str,
    /// Record kind, when the token is known
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<PassKind>,
    /// Ticket metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_info: Option<TicketInfo>,
    /// Subscription metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_info: Option<SubscriptionInfo>,
    /// When the ticket was redeemed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    /// Who redeemed the ticket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<String>,
}

impl From<Verification> for ValidationResponse {
    fn from(verification: Verification) -> Self {
        let redemption = verification.redemption().cloned();
        let (ticket_info, subscription_info) = match &verification.record {
            Some(PassRecord::Ticket(ticket)) => (Some(TicketInfo::from(ticket)), None),
            Some(PassRecord::Subscription(sub)) => (None, Some(SubscriptionInfo::from(sub))),
            None => (None, None),
        };

        Self {
            valid: verification.verdict.is_accepted(),
            reason: verification.verdict.rejection().map(ToString::to_string),
            code: outcome_label(&verification.verdict),
            kind: verification.record.as_ref().map(PassRecord::kind),
            ticket_info,
            subscription_info,
            used_at: redemption.as_ref().map(|r| r.used_at),
            used_by: redemption.map(|r| r.used_by),
        }
    }
}

fn parse_token(raw: &str) -> Result<QrToken, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::bad_request("qr_code_token is required"));
    }
    Ok(QrToken::new(raw))
}

// ============================================================================
// Handlers
// ============================================================================

/// Issue (or re-fetch) the token for one of the caller's passes.
///
/// Idempotent: every call for the same record returns the same token.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/qr/issue \
///   -H "X-User-Id: 550e8400-e29b-41d4-a716-446655440000" \
///   -H "Content-Type: application/json" \
///   -d '{"ticket_id": "660e8400-e29b-41d4-a716-446655440001"}'
/// ```
///
/// Response:
/// ```json
/// {
///   "qr_code_token": "3q2-7wX...",
///   "qr_code_data": "{\"type\":\"ticket\",...}",
///   "type": "ticket",
///   "verify_url": "https://club.example/verify?token=3q2-7wX...",
///   "ticket_url": "https://club.example/ticket?token=3q2-7wX..."
/// }
/// ```
///
/// # Errors
///
/// - 400 Bad Request: Neither or both IDs given
/// - 404 Not Found: No such pass, or it belongs to someone else
/// - 500 Internal Server Error: Token could not be attached (safe to retry)
pub async fn issue(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<IssueRequest>,
) -> Result<Json<IssueResponse>, AppError> {
    let pass = request.pass_ref()?;
    let issued = state.service.issue_token(&session, pass).await?;

    Ok(Json(IssueResponse {
        qr_code_token: issued.token.as_str().to_string(),
        qr_code_data: issued.data,
        kind: issued.kind,
        verify_url: issued.verify_url,
        ticket_url: issued.ticket_url,
    }))
}

/// Validate a scanned token.
///
/// With `mark_as_used: false` (the default) this is a pure check. With
/// `mark_as_used: true` the caller must be staff or admin and an accepted
/// ticket is redeemed; a second redeem reports the first one.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/qr/validate \
///   -H "X-User-Id: 770e8400-e29b-41d4-a716-446655440002" \
///   -H "X-User-Name: North gate" \
///   -H "X-User-Role: staff" \
///   -H "Content-Type: application/json" \
///   -d '{"qr_code_token": "3q2-7wX...", "mark_as_used": true}'
/// ```
///
/// Response (second scan):
/// ```json
/// {
///   "valid": false,
///   "reason": "Ticket already used at 2025-06-01T19:02:11+00:00 by North gate",
///   "code": "already_redeemed",
///   "type": "ticket",
///   "ticket_info": { ... },
///   "used_at": "2025-06-01T19:02:11Z",
///   "used_by": "North gate"
/// }
/// ```
///
/// # Errors
///
/// - 400 Bad Request: Empty token
/// - 403 Forbidden: Redeem requested by a member session
pub async fn validate(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidationResponse>, AppError> {
    let token = parse_token(&request.qr_code_token)?;

    let verification = if request.mark_as_used {
        state
            .service
            .redeem(&session, &token, request.validator_name)
            .await?
    } else {
        state.service.verify(&token).await?
    };

    Ok(Json(verification.into()))
}

/// Public landing page data for a token. Never mutates.
///
/// # Example
///
/// ```bash
/// curl "http://localhost:8080/api/qr/public?qr_code_token=3q2-7wX..."
/// ```
///
/// # Errors
///
/// - 400 Bad Request: Empty token
pub async fn public_view(
    State(state): State<AppState>,
    Query(query): Query<PublicQuery>,
) -> Result<Json<ValidationResponse>, AppError> {
    let token = parse_token(&query.qr_code_token)?;
    let verification = state.service.view(&token).await?;
    Ok(Json(verification.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Money, Redemption, Ticket, TicketStatus, UserId};
    use crate::verification::{Rejection, Verdict};
    use axum::http::StatusCode;
    use passgate_testing::test_epoch;

    #[test]
    fn issue_request_needs_exactly_one_id() {
        let both = IssueRequest {
            ticket_id: Some(Uuid::new_v4()),
            subscription_id: Some(Uuid::new_v4()),
        };
        assert_eq!(
            both.pass_ref().map_err(|e| e.status()),
            Err(StatusCode::BAD_REQUEST)
        );
        assert!(IssueRequest::default().pass_ref().is_err());

        let id = Uuid::new_v4();
        let ticket = IssueRequest {
            ticket_id: Some(id),
            subscription_id: None,
        };
        assert_eq!(
            ticket.pass_ref().map_err(|e| e.status()),
            Ok(PassRef::Ticket(TicketId::from_uuid(id)))
        );
    }

    #[test]
    fn rejected_redemption_reports_prior_use() {
        let mut ticket = Ticket::new(
            UserId::new(),
            Money::new(2500, "EUR"),
            TicketStatus::Paid,
            test_epoch(),
        );
        let redemption = Redemption {
            used_at: test_epoch(),
            used_by: "North gate".to_string(),
        };
        ticket.redemption = Some(redemption.clone());

        let response = ValidationResponse::from(Verification {
            verdict: Verdict::Rejected(Rejection::AlreadyRedeemed { redemption }),
            record: Some(PassRecord::Ticket(ticket)),
        });

        assert!(!response.valid);
        assert_eq!(response.code, "already_redeemed");
        assert_eq!(response.used_by.as_deref(), Some("North gate"));
        assert!(response.reason.unwrap().contains("already used"));
        assert!(response.ticket_info.is_some());
    }

    #[test]
    fn unknown_token_has_no_metadata() {
        let response = ValidationResponse::from(Verification {
            verdict: Verdict::Rejected(Rejection::UnknownToken),
            record: None,
        });
        assert_eq!(response.code, "unknown_token");
        assert!(response.kind.is_none());
        assert!(response.ticket_info.is_none());
    }

    #[test]
    fn blank_token_is_bad_request() {
        assert!(parse_token("   ").is_err());
        assert_eq!(parse_token(" abc ").unwrap(), QrToken::new("abc"));
    }
}
