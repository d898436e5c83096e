//! Entry validity rules.
//!
//! Every endpoint that answers "is this pass good for entry?" goes through
//! [`evaluate`]. Status acceptance is an exhaustive match per record kind so a
//! new status cannot be added without deciding whether it admits entry.

use crate::types::{
    PassKind, PassRecord, Redemption, Subscription, SubscriptionStatus, Ticket, TicketStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Why a token does not admit entry
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Rejection {
    /// No ticket or subscription carries the token
    #[error("QR code not recognized")]
    UnknownToken,

    /// Status is outside the accepted set
    #[error("{}", unpaid_message(*.kind, .status))]
    Unpaid {
        /// Record kind
        kind: PassKind,
        /// Current status wire name
        status: &'static str,
    },

    /// Validity boundary has passed
    #[error("{} expired at {}", capitalize(.kind.as_str()), .boundary.to_rfc3339())]
    Expired {
        /// Record kind
        kind: PassKind,
        /// The boundary that passed
        boundary: DateTime<Utc>,
    },

    /// Ticket has already been used
    #[error(
        "Ticket already used at {} by {}",
        .redemption.used_at.to_rfc3339(),
        .redemption.used_by
    )]
    AlreadyRedeemed {
        /// The prior redemption
        redemption: Redemption,
    },
}

fn unpaid_message(kind: PassKind, status: &str) -> String {
    match kind {
        PassKind::Ticket => format!("Ticket has not been paid (status: {status})"),
        PassKind::Subscription => format!("Subscription is not active (status: {status})"),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Result of evaluating a pass for entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The pass admits entry now
    Accepted,
    /// The pass does not admit entry
    Rejected(Rejection),
}

impl Verdict {
    /// Whether entry is admitted
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// The rejection, if any
    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accepted => None,
            Self::Rejected(r) => Some(r),
        }
    }
}

/// Whether a ticket status admits entry
#[must_use]
pub const fn ticket_status_accepted(status: TicketStatus) -> bool {
    match status {
        TicketStatus::Paid | TicketStatus::Test => true,
        TicketStatus::Pending | TicketStatus::Refunded | TicketStatus::Cancelled => false,
    }
}

/// Ticket statuses that admit entry
pub fn accepted_ticket_statuses() -> impl Iterator<Item = TicketStatus> {
    TicketStatus::ALL
        .into_iter()
        .filter(|status| ticket_status_accepted(*status))
}

/// Whether a subscription status admits entry
#[must_use]
pub const fn subscription_status_accepted(status: SubscriptionStatus) -> bool {
    match status {
        SubscriptionStatus::Active => true,
        SubscriptionStatus::PastDue | SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
            false
        },
    }
}

/// Decide whether `record` admits entry at `now`.
///
/// Checks, in order: status, redemption latch (tickets only), validity
/// boundary. The boundary is inclusive.
#[must_use]
pub fn evaluate(record: &PassRecord, now: DateTime<Utc>) -> Verdict {
    match record {
        PassRecord::Ticket(ticket) => evaluate_ticket(ticket, now),
        PassRecord::Subscription(subscription) => evaluate_subscription(subscription, now),
    }
}

pub(crate) fn evaluate_ticket(ticket: &Ticket, now: DateTime<Utc>) -> Verdict {
    if !ticket_status_accepted(ticket.status) {
        return Verdict::Rejected(Rejection::Unpaid {
            kind: PassKind::Ticket,
            status: ticket.status.as_str(),
        });
    }

    if let Some(redemption) = &ticket.redemption {
        return Verdict::Rejected(Rejection::AlreadyRedeemed {
            redemption: redemption.clone(),
        });
    }

    match ticket.valid_until {
        Some(boundary) if now > boundary => Verdict::Rejected(Rejection::Expired {
            kind: PassKind::Ticket,
            boundary,
        }),
        _ => Verdict::Accepted,
    }
}

fn evaluate_subscription(subscription: &Subscription, now: DateTime<Utc>) -> Verdict {
    if !subscription_status_accepted(subscription.status) {
        return Verdict::Rejected(Rejection::Unpaid {
            kind: PassKind::Subscription,
            status: subscription.status.as_str(),
        });
    }

    if now > subscription.current_period_end {
        return Verdict::Rejected(Rejection::Expired {
            kind: PassKind::Subscription,
            boundary: subscription.current_period_end,
        });
    }

    Verdict::Accepted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Money, UserId};
    use chrono::Duration;
    use passgate_testing::test_epoch;
    use proptest::prelude::*;

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket::new(UserId::new(), Money::new(2000, "EUR"), status, test_epoch())
    }

    fn subscription(status: SubscriptionStatus, period_end: DateTime<Utc>) -> PassRecord {
        PassRecord::Subscription(Subscription::new(
            UserId::new(),
            "monthly",
            status,
            period_end,
            test_epoch(),
        ))
    }

    fn ticket_status() -> impl Strategy<Value = TicketStatus> {
        prop_oneof![
            Just(TicketStatus::Pending),
            Just(TicketStatus::Paid),
            Just(TicketStatus::Test),
            Just(TicketStatus::Refunded),
            Just(TicketStatus::Cancelled),
        ]
    }

    #[test]
    fn paid_ticket_without_boundary_is_accepted() {
        let record = PassRecord::Ticket(ticket(TicketStatus::Paid));
        assert_eq!(evaluate(&record, test_epoch()), Verdict::Accepted);
    }

    #[test]
    fn test_ticket_is_accepted() {
        let record = PassRecord::Ticket(ticket(TicketStatus::Test));
        assert!(evaluate(&record, test_epoch()).is_accepted());
    }

    #[test]
    fn boundary_is_inclusive() {
        let now = test_epoch();
        let record = PassRecord::Ticket(ticket(TicketStatus::Paid).valid_until(now));
        assert!(evaluate(&record, now).is_accepted());

        let later = now + Duration::seconds(1);
        assert_eq!(
            evaluate(&record, later),
            Verdict::Rejected(Rejection::Expired {
                kind: PassKind::Ticket,
                boundary: now,
            })
        );
    }

    #[test]
    fn pending_ticket_reason_mentions_payment() {
        let record = PassRecord::Ticket(ticket(TicketStatus::Pending));
        let verdict = evaluate(&record, test_epoch());
        assert_eq!(
            verdict.rejection().unwrap().to_string(),
            "Ticket has not been paid (status: pending)"
        );
    }

    #[test]
    fn redeemed_ticket_reports_prior_use() {
        let mut t = ticket(TicketStatus::Paid);
        t.redemption = Some(Redemption {
            used_at: test_epoch(),
            used_by: "Door A".to_string(),
        });
        let reason = evaluate(&PassRecord::Ticket(t), test_epoch())
            .rejection()
            .unwrap()
            .to_string();
        assert_eq!(
            reason,
            "Ticket already used at 2025-01-01T00:00:00+00:00 by Door A"
        );
    }

    #[test]
    fn lapsed_subscription_is_expired() {
        let now = test_epoch();
        let record = subscription(SubscriptionStatus::Active, now - Duration::days(1));
        let reason = evaluate(&record, now).rejection().unwrap().to_string();
        assert!(reason.starts_with("Subscription expired at"));
    }

    #[test]
    fn past_due_subscription_is_rejected() {
        let now = test_epoch();
        let record = subscription(SubscriptionStatus::PastDue, now + Duration::days(3));
        assert!(matches!(
            evaluate(&record, now),
            Verdict::Rejected(Rejection::Unpaid {
                kind: PassKind::Subscription,
                status: "past_due"
            })
        ));
    }

    #[test]
    fn rejection_serializes_with_code() {
        let json = serde_json::to_value(Rejection::UnknownToken).unwrap();
        assert_eq!(json["code"], "unknown_token");
    }

    proptest! {
        #[test]
        fn unaccepted_status_rejects_regardless_of_timing(
            status in ticket_status(),
            offset_hours in -1000i64..1000,
        ) {
            prop_assume!(!ticket_status_accepted(status));
            let now = test_epoch();
            let record = PassRecord::Ticket(
                ticket(status).valid_until(now + Duration::hours(offset_hours)),
            );
            let rejected_for_status = matches!(
                evaluate(&record, now),
                Verdict::Rejected(Rejection::Unpaid { .. })
            );
            prop_assert!(rejected_for_status);
        }

        #[test]
        fn past_boundary_never_admits(
            status in ticket_status(),
            seconds_late in 1i64..10_000_000,
        ) {
            let now = test_epoch();
            let record = PassRecord::Ticket(
                ticket(status).valid_until(now - Duration::seconds(seconds_late)),
            );
            prop_assert!(!evaluate(&record, now).is_accepted());
        }

        #[test]
        fn redeemed_ticket_never_admits(
            seconds_left in 0i64..10_000_000,
        ) {
            let now = test_epoch();
            let mut t = ticket(TicketStatus::Paid).valid_until(now + Duration::seconds(seconds_left));
            t.redemption = Some(Redemption { used_at: now, used_by: "Gate".into() });
            let already_redeemed = matches!(
                evaluate(&PassRecord::Ticket(t), now),
                Verdict::Rejected(Rejection::AlreadyRedeemed { .. })
            );
            prop_assert!(already_redeemed);
        }
    }
}
