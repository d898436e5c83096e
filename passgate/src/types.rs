//! Domain types for tickets, subscriptions and their QR tokens.
//!
//! A *pass* is either a single-use [`Ticket`] or an unlimited-use
//! [`Subscription`]. Both can carry an opaque [`QrToken`] once issued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random `SubscriptionId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `SubscriptionId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a platform user (pass owner, staff member, admin)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to exactly one pass record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassRef {
    /// A ticket
    Ticket(TicketId),
    /// A subscription
    Subscription(SubscriptionId),
}

impl PassRef {
    /// Kind of record referenced
    #[must_use]
    pub const fn kind(&self) -> PassKind {
        match self {
            Self::Ticket(_) => PassKind::Ticket,
            Self::Subscription(_) => PassKind::Subscription,
        }
    }
}

impl fmt::Display for PassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket(id) => write!(f, "Ticket {id}"),
            Self::Subscription(id) => write!(f, "Subscription {id}"),
        }
    }
}

/// Record kind, as exposed in QR payloads and API responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// Single-use ticket
    Ticket,
    /// Recurring membership subscription
    Subscription,
}

impl PassKind {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Opaque, URL-safe token embedded in a QR code
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QrToken(String);

impl QrToken {
    /// Wrap an existing token string
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the token text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QrToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monetary amount in minor units (cents) with an ISO 4217 currency code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units
    pub amount: i64,
    /// Currency code, upper case (for example `EUR`)
    pub currency: String,
}

impl Money {
    /// Creates an amount in minor units
    #[must_use]
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().to_uppercase(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

/// Redemption marker written when a ticket is used at the door
///
/// `used_at` and `used_by` are always set together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    /// When the ticket was redeemed
    pub used_at: DateTime<Utc>,
    /// Display name of the validator that redeemed it
    pub used_by: String,
}

/// Error returned when parsing a status from its wire name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} status: {value}")]
pub struct UnknownStatus {
    kind: PassKind,
    value: String,
}

// ============================================================================
// Statuses
// ============================================================================

/// Ticket lifecycle status
///
/// ```text
/// pending → paid → refunded | cancelled
///    ↓
/// cancelled
/// test (terminal, accepted at the door)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Awaiting payment
    Pending,
    /// Paid in full
    Paid,
    /// Complimentary/test ticket
    Test,
    /// Payment returned to the buyer
    Refunded,
    /// Cancelled before or after payment
    Cancelled,
}

impl TicketStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Paid,
        Self::Test,
        Self::Refunded,
        Self::Cancelled,
    ];

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Test => "test",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether an administrator may move a ticket from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid | Self::Cancelled)
                | (Self::Paid, Self::Refunded | Self::Cancelled)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "test" => Ok(Self::Test),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                kind: PassKind::Ticket,
                value: other.to_string(),
            }),
        }
    }
}

/// Subscription billing status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up for the current period
    Active,
    /// Renewal payment failed, in grace period
    PastDue,
    /// Cancelled by the member or an admin
    Cancelled,
    /// Ran out without renewal
    Expired,
}

impl SubscriptionStatus {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Whether a subscription may move from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::PastDue)
                | (Self::PastDue, Self::Active)
                | (Self::Active | Self::PastDue, Self::Cancelled | Self::Expired)
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus {
                kind: PassKind::Subscription,
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A single-use event ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning user
    pub owner: UserId,
    /// Price paid
    pub amount: Money,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Optional event label printed on the pass
    pub event_name: Option<String>,
    /// Last instant the ticket admits entry (inclusive)
    pub valid_until: Option<DateTime<Utc>>,
    /// Set once, when the ticket is redeemed
    pub redemption: Option<Redemption>,
    /// QR token, attached on first display
    pub qr_code_token: Option<QrToken>,
    /// Serialized QR payload, attached together with the token
    pub qr_code_data: Option<String>,
    /// When the ticket was created
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// Creates an unissued, unredeemed ticket
    #[must_use]
    pub fn new(
        owner: UserId,
        amount: Money,
        status: TicketStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(),
            owner,
            amount,
            status,
            event_name: None,
            valid_until: None,
            redemption: None,
            qr_code_token: None,
            qr_code_data: None,
            created_at,
        }
    }

    /// Sets the event label
    #[must_use]
    pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    /// Sets the validity boundary
    #[must_use]
    pub const fn valid_until(mut self, until: DateTime<Utc>) -> Self {
        self.valid_until = Some(until);
        self
    }

    /// Whether the redemption latch is set
    #[must_use]
    pub const fn is_redeemed(&self) -> bool {
        self.redemption.is_some()
    }
}

/// A recurring membership pass, usable any number of times while active
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID
    pub id: SubscriptionId,
    /// Owning user
    pub owner: UserId,
    /// Plan label (for example `annual`)
    pub plan: String,
    /// Billing status
    pub status: SubscriptionStatus,
    /// End of the paid period (inclusive)
    pub current_period_end: DateTime<Utc>,
    /// QR token, attached on first display
    pub qr_code_token: Option<QrToken>,
    /// Serialized QR payload
    pub qr_code_data: Option<String>,
    /// When the subscription was created
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates an unissued subscription
    #[must_use]
    pub fn new(
        owner: UserId,
        plan: impl Into<String>,
        status: SubscriptionStatus,
        current_period_end: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            owner,
            plan: plan.into(),
            status,
            current_period_end,
            qr_code_token: None,
            qr_code_data: None,
            created_at,
        }
    }
}

/// Either kind of pass, as loaded from the repository
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassRecord {
    /// A ticket
    Ticket(Ticket),
    /// A subscription
    Subscription(Subscription),
}

impl PassRecord {
    /// Kind of this record
    #[must_use]
    pub const fn kind(&self) -> PassKind {
        match self {
            Self::Ticket(_) => PassKind::Ticket,
            Self::Subscription(_) => PassKind::Subscription,
        }
    }

    /// Reference to this record
    #[must_use]
    pub const fn pass_ref(&self) -> PassRef {
        match self {
            Self::Ticket(t) => PassRef::Ticket(t.id),
            Self::Subscription(s) => PassRef::Subscription(s.id),
        }
    }

    /// Owning user
    #[must_use]
    pub const fn owner(&self) -> UserId {
        match self {
            Self::Ticket(t) => t.owner,
            Self::Subscription(s) => s.owner,
        }
    }

    /// Attached QR token, if issued
    #[must_use]
    pub const fn token(&self) -> Option<&QrToken> {
        match self {
            Self::Ticket(t) => t.qr_code_token.as_ref(),
            Self::Subscription(s) => s.qr_code_token.as_ref(),
        }
    }

    /// Serialized QR payload, if issued
    #[must_use]
    pub fn qr_code_data(&self) -> Option<&str> {
        match self {
            Self::Ticket(t) => t.qr_code_data.as_deref(),
            Self::Subscription(s) => s.qr_code_data.as_deref(),
        }
    }

    /// Attach a token and payload to the record
    pub fn attach_token(&mut self, token: QrToken, data: String) {
        match self {
            Self::Ticket(t) => {
                t.qr_code_token = Some(token);
                t.qr_code_data = Some(data);
            },
            Self::Subscription(s) => {
                s.qr_code_token = Some(token);
                s.qr_code_data = Some(data);
            },
        }
    }

    /// Status wire name
    #[must_use]
    pub const fn status_str(&self) -> &'static str {
        match self {
            Self::Ticket(t) => t.status.as_str(),
            Self::Subscription(s) => s.status.as_str(),
        }
    }
}

// ============================================================================
// QR payload
// ============================================================================

/// Verification payload serialized into `qr_code_data`
///
/// Carries enough business context for an offline display; the token is the
/// only field a scanner trusts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QrPayload {
    /// Ticket payload
    Ticket {
        /// Ticket ID
        id: TicketId,
        /// Owning user
        owner: UserId,
        /// QR token
        token: QrToken,
        /// Amount in minor units
        amount: i64,
        /// Currency code
        currency: String,
        /// Status at issue time
        status: TicketStatus,
        /// Validity boundary
        valid_until: Option<DateTime<Utc>>,
    },
    /// Subscription payload
    Subscription {
        /// Subscription ID
        id: SubscriptionId,
        /// Owning user
        owner: UserId,
        /// QR token
        token: QrToken,
        /// Plan label
        plan: String,
        /// Status at issue time
        status: SubscriptionStatus,
        /// End of the paid period
        current_period_end: DateTime<Utc>,
    },
}

impl QrPayload {
    /// Build the payload for `record` carrying `token`
    #[must_use]
    pub fn for_record(record: &PassRecord, token: &QrToken) -> Self {
        match record {
            PassRecord::Ticket(t) => Self::Ticket {
                id: t.id,
                owner: t.owner,
                token: token.clone(),
                amount: t.amount.amount,
                currency: t.amount.currency.clone(),
                status: t.status,
                valid_until: t.valid_until,
            },
            PassRecord::Subscription(s) => Self::Subscription {
                id: s.id,
                owner: s.owner,
                token: token.clone(),
                plan: s.plan.clone(),
                status: s.status,
                current_period_end: s.current_period_end,
            },
        }
    }

    /// Serialize to the JSON text stored on the record
    ///
    /// # Errors
    ///
    /// Returns a serialization error (only possible for non-string map keys,
    /// which this type has none of).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, 18, 0, 0).unwrap()
    }

    #[test]
    fn ticket_transitions() {
        use TicketStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Test.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Paid));
    }

    #[test]
    fn subscription_transitions() {
        use SubscriptionStatus::*;
        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(Active));
        assert!(PastDue.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
    }

    #[test]
    fn status_wire_names_parse_back() {
        for status in [
            TicketStatus::Pending,
            TicketStatus::Paid,
            TicketStatus::Test,
            TicketStatus::Refunded,
            TicketStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert_eq!(
            "past_due".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::PastDue
        );
        let err = "refundedd".parse::<TicketStatus>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown ticket status: refundedd");
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::new(2500, "eur").to_string(), "25.00 EUR");
        assert_eq!(Money::new(-5, "USD").to_string(), "-0.05 USD");
    }

    #[test]
    fn ticket_payload_is_tagged_json() {
        let ticket = Ticket::new(UserId::new(), Money::new(1500, "EUR"), TicketStatus::Paid, at(1))
            .valid_until(at(2));
        let token = QrToken::new("tok");
        let record = PassRecord::Ticket(ticket.clone());

        let json: serde_json::Value =
            serde_json::from_str(&QrPayload::for_record(&record, &token).to_json().unwrap())
                .unwrap();

        assert_eq!(json["type"], "ticket");
        assert_eq!(json["id"], ticket.id.to_string());
        assert_eq!(json["token"], "tok");
        assert_eq!(json["amount"], 1500);
        assert_eq!(json["status"], "paid");
    }

    #[test]
    fn attach_token_sets_both_fields() {
        let mut record = PassRecord::Subscription(Subscription::new(
            UserId::new(),
            "annual",
            SubscriptionStatus::Active,
            at(30),
            at(1),
        ));
        assert!(record.token().is_none());

        record.attach_token(QrToken::new("abc"), "{}".to_string());

        assert_eq!(record.token(), Some(&QrToken::new("abc")));
        assert_eq!(record.qr_code_data(), Some("{}"));
    }
}
