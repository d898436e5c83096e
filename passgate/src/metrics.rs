//! Business metrics for door validation.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `passgate_redemptions_total{outcome}` - Redeem attempts by outcome
//!   (`accepted`, `already_redeemed`, `expired`, `unpaid`, `unknown_token`)
//! - `passgate_verifications_total{outcome}` - Read-only checks by outcome
//! - `passgate_tokens_issued_total{type}` - Tokens attached on first display
//! - `passgate_redemption_resets_total` - Administrative latch resets
//! - `passgate_passes_registered_total{type}` - Records created by the
//!   payment collaborator

use crate::types::PassKind;
use crate::verification::{Rejection, Verdict};
use metrics::describe_counter;

/// Register descriptions for all business metrics.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "passgate_redemptions_total",
        "Redeem attempts by outcome (accepted, already_redeemed, expired, unpaid, unknown_token)"
    );
    describe_counter!(
        "passgate_verifications_total",
        "Read-only token checks by outcome"
    );
    describe_counter!(
        "passgate_tokens_issued_total",
        "QR tokens attached to a ticket or subscription"
    );
    describe_counter!(
        "passgate_redemption_resets_total",
        "Redemptions cleared by an administrator"
    );
    describe_counter!(
        "passgate_passes_registered_total",
        "Tickets and subscriptions registered after payment"
    );

    tracing::info!("Business metrics registered");
}

/// Metric label for a verdict
#[must_use]
pub const fn outcome_label(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Accepted => "accepted",
        Verdict::Rejected(Rejection::AlreadyRedeemed { .. }) => "already_redeemed",
        Verdict::Rejected(Rejection::Expired { .. }) => "expired",
        Verdict::Rejected(Rejection::Unpaid { .. }) => "unpaid",
        Verdict::Rejected(Rejection::UnknownToken) => "unknown_token",
    }
}

/// Record a redeem attempt.
pub fn record_redemption(verdict: &Verdict) {
    let outcome = outcome_label(verdict);
    metrics::counter!("passgate_redemptions_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded redemption metric");
}

/// Record a read-only verification.
pub fn record_verification(verdict: &Verdict) {
    metrics::counter!("passgate_verifications_total", "outcome" => outcome_label(verdict))
        .increment(1);
}

/// Record a freshly attached token.
pub fn record_token_issued(kind: PassKind) {
    metrics::counter!("passgate_tokens_issued_total", "type" => kind.as_str()).increment(1);
}

/// Record an administrative reset.
pub fn record_redemption_reset() {
    metrics::counter!("passgate_redemption_resets_total").increment(1);
}

/// Record a registered ticket or subscription.
pub fn record_pass_registered(kind: PassKind) {
    metrics::counter!("passgate_passes_registered_total", "type" => kind.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Redemption;
    use chrono::Utc;

    #[test]
    fn labels_cover_every_verdict() {
        assert_eq!(outcome_label(&Verdict::Accepted), "accepted");
        assert_eq!(
            outcome_label(&Verdict::Rejected(Rejection::UnknownToken)),
            "unknown_token"
        );
        let redeemed = Verdict::Rejected(Rejection::AlreadyRedeemed {
            redemption: Redemption {
                used_at: Utc::now(),
                used_by: "Door".to_string(),
            },
        });
        assert_eq!(outcome_label(&redeemed), "already_redeemed");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_redemption(&Verdict::Accepted);
        record_token_issued(PassKind::Ticket);
        record_redemption_reset();
    }
}
