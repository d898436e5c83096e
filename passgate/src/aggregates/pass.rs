//! Pass aggregate: token issuance, verification, redemption and admin
//! corrections for one loaded ticket or subscription.
//!
//! The reducer decides; the repository effects make the decision durable.
//! Every write is a compare-and-set whose result comes back as an event, so
//! a lost race is reduced like any other outcome:
//!
//! ```text
//! unissued ──IssueToken──▶ issued ──RedeemPass──▶ redeemed
//!                            ▲                        │
//!                            └────ResetRedemption─────┘ (admin)
//! ```

use crate::error::PassError;
use crate::repository::{AttachOutcome, PassRepository, RedeemOutcome, RepositoryError};
use crate::session::Session;
use crate::tokens::TokenGenerator;
use crate::types::{
    PassKind, PassRecord, QrPayload, QrToken, Redemption, SubscriptionStatus, TicketStatus,
};
use crate::verification::{self, Rejection, Verdict};
use passgate_core::{
    async_effect, effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec,
};
use std::sync::Arc;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the pass aggregate
#[derive(Clone, Debug)]
pub enum PassAction {
    // Commands
    /// Return the record's token, minting and attaching one if needed
    IssueToken {
        /// Caller; must own the record
        session: Session,
    },

    /// Evaluate the record for entry without changing it
    VerifyPass,

    /// Evaluate the record and, for an accepted ticket, set the latch
    RedeemPass {
        /// Caller; staff or admin
        session: Session,
        /// Recorded as `used_by`; defaults to the session display name
        validator_name: Option<String>,
    },

    /// Clear a ticket's redemption latch (admin only)
    ResetRedemption {
        /// Caller
        session: Session,
    },

    /// Move a ticket to a new status (admin only)
    ChangeTicketStatus {
        /// Caller
        session: Session,
        /// Requested status
        status: TicketStatus,
    },

    /// Move a subscription to a new status (admin only)
    ChangeSubscriptionStatus {
        /// Caller
        session: Session,
        /// Requested status
        status: SubscriptionStatus,
    },

    // Events
    /// The record carries this token
    TokenIssued {
        /// Token
        token: QrToken,
        /// Serialized payload
        data: String,
        /// Whether the token was attached by this request
        fresh: bool,
    },

    /// Verification finished
    Verified {
        /// Result
        verdict: Verdict,
    },

    /// This request set the ticket's latch
    TicketRedeemed {
        /// Marker written
        redemption: Redemption,
    },

    /// Another request set the latch first
    RedemptionRaceLost {
        /// The winner's marker
        redemption: Redemption,
    },

    /// The stored ticket stopped admitting entry before the latch was set
    RedemptionRefused {
        /// Why, judged on the stored ticket
        rejection: Rejection,
    },

    /// The latch was cleared
    RedemptionCleared {
        /// Marker that was removed
        previous: Redemption,
    },

    /// Ticket status changed
    TicketStatusChanged {
        /// Previous status
        from: TicketStatus,
        /// New status
        to: TicketStatus,
    },

    /// Subscription status changed
    SubscriptionStatusChanged {
        /// Previous status
        from: SubscriptionStatus,
        /// New status
        to: SubscriptionStatus,
    },

    /// Command rejected, or its write failed
    ValidationFailed {
        /// Why
        error: PassError,
    },
}

// ============================================================================
// State
// ============================================================================

/// What a finished command produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Token returned by `IssueToken`
    Issued {
        /// Token
        token: QrToken,
        /// Serialized payload
        data: String,
        /// Whether this request attached it
        fresh: bool,
    },
    /// Result of `VerifyPass` or `RedeemPass`
    Checked(Verdict),
    /// Latch cleared by `ResetRedemption`
    Reset {
        /// Marker that was removed
        previous: Redemption,
    },
    /// Status changed
    StatusChanged,
}

/// State for one request against one pass
#[derive(Clone, Debug, Default)]
pub struct PassState {
    /// The record as loaded, updated by applied events
    pub record: Option<PassRecord>,
    /// Set once the command has finished successfully
    pub outcome: Option<PassOutcome>,
    /// Set when the command was rejected or its write failed
    pub last_error: Option<PassError>,
}

impl PassState {
    /// State around a loaded record
    #[must_use]
    pub const fn loaded(record: PassRecord) -> Self {
        Self {
            record: Some(record),
            outcome: None,
            last_error: None,
        }
    }

    /// State for a token that matched no record
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            record: None,
            outcome: None,
            last_error: None,
        }
    }

    /// Final result once the store has settled
    ///
    /// # Errors
    ///
    /// Returns the recorded failure, or [`PassError::Storage`] if the command
    /// never produced an outcome.
    pub fn result(&self) -> Result<PassOutcome, PassError> {
        if let Some(error) = &self.last_error {
            return Err(error.clone());
        }
        self.outcome
            .clone()
            .ok_or_else(|| PassError::Storage("Operation did not complete".to_string()))
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the pass aggregate
#[derive(Clone)]
pub struct PassEnvironment {
    /// Clock for validity checks and redemption timestamps
    pub clock: Arc<dyn Clock>,
    /// Token source for first issue
    pub tokens: Arc<dyn TokenGenerator>,
    /// Storage the effects write to
    pub repository: Arc<dyn PassRepository>,
}

impl PassEnvironment {
    /// Creates a new `PassEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenGenerator>,
        repository: Arc<dyn PassRepository>,
    ) -> Self {
        Self {
            clock,
            tokens,
            repository,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the pass aggregate
#[derive(Clone, Debug, Default)]
pub struct PassReducer;

impl PassReducer {
    /// Creates a new `PassReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn require_record(state: &PassState) -> Result<&PassRecord, PassError> {
        state
            .record
            .as_ref()
            .ok_or_else(|| PassError::NotFound("Pass".to_string()))
    }

    fn require_admin(session: &Session, operation: &str) -> Result<(), PassError> {
        if session.is_admin() {
            Ok(())
        } else {
            Err(PassError::Unauthorized(format!(
                "{operation} requires an admin session"
            )))
        }
    }

    /// Validates `IssueToken`
    fn validate_issue(state: &PassState, session: &Session) -> Result<(), PassError> {
        let record = Self::require_record(state)?;
        // Foreign records are indistinguishable from missing ones
        if record.owner() != session.user_id {
            return Err(PassError::NotFound(record.pass_ref().to_string()));
        }
        Ok(())
    }

    /// Validates `ResetRedemption`, returning the marker to clear
    fn validate_reset(state: &PassState, session: &Session) -> Result<Redemption, PassError> {
        Self::require_admin(session, "Resetting a redemption")?;
        match Self::require_record(state)? {
            PassRecord::Ticket(ticket) => ticket
                .redemption
                .clone()
                .ok_or(PassError::NotRedeemed(ticket.id)),
            PassRecord::Subscription(_) => Err(PassError::InvalidRequest(
                "Subscriptions have no redemption to reset".to_string(),
            )),
        }
    }

    /// Applies an event to state
    fn apply_event(state: &mut PassState, action: &PassAction) {
        match action {
            PassAction::TokenIssued { token, data, fresh } => {
                if let Some(record) = state.record.as_mut() {
                    record.attach_token(token.clone(), data.clone());
                }
                state.outcome = Some(PassOutcome::Issued {
                    token: token.clone(),
                    data: data.clone(),
                    fresh: *fresh,
                });
                state.last_error = None;
            },

            PassAction::Verified { verdict } => {
                state.outcome = Some(PassOutcome::Checked(verdict.clone()));
                state.last_error = None;
            },

            PassAction::TicketRedeemed { redemption } => {
                if let Some(PassRecord::Ticket(ticket)) = state.record.as_mut() {
                    ticket.redemption = Some(redemption.clone());
                }
                state.outcome = Some(PassOutcome::Checked(Verdict::Accepted));
                state.last_error = None;
            },

            PassAction::RedemptionRaceLost { redemption } => {
                if let Some(PassRecord::Ticket(ticket)) = state.record.as_mut() {
                    ticket.redemption = Some(redemption.clone());
                }
                state.outcome = Some(PassOutcome::Checked(Verdict::Rejected(
                    Rejection::AlreadyRedeemed {
                        redemption: redemption.clone(),
                    },
                )));
                state.last_error = None;
            },

            PassAction::RedemptionRefused { rejection } => {
                if let (Some(PassRecord::Ticket(ticket)), Rejection::Unpaid { status, .. }) =
                    (state.record.as_mut(), rejection)
                {
                    if let Ok(status) = status.parse::<TicketStatus>() {
                        ticket.status = status;
                    }
                }
                state.outcome = Some(PassOutcome::Checked(Verdict::Rejected(rejection.clone())));
                state.last_error = None;
            },

            PassAction::RedemptionCleared { previous } => {
                if let Some(PassRecord::Ticket(ticket)) = state.record.as_mut() {
                    ticket.redemption = None;
                }
                state.outcome = Some(PassOutcome::Reset {
                    previous: previous.clone(),
                });
                state.last_error = None;
            },

            PassAction::TicketStatusChanged { to, .. } => {
                if let Some(PassRecord::Ticket(ticket)) = state.record.as_mut() {
                    ticket.status = *to;
                }
                state.outcome = Some(PassOutcome::StatusChanged);
                state.last_error = None;
            },

            PassAction::SubscriptionStatusChanged { to, .. } => {
                if let Some(PassRecord::Subscription(subscription)) = state.record.as_mut() {
                    subscription.status = *to;
                }
                state.outcome = Some(PassOutcome::StatusChanged);
                state.last_error = None;
            },

            PassAction::ValidationFailed { error } => {
                state.last_error = Some(error.clone());
            },

            // Commands don't modify state
            PassAction::IssueToken { .. }
            | PassAction::VerifyPass
            | PassAction::RedeemPass { .. }
            | PassAction::ResetRedemption { .. }
            | PassAction::ChangeTicketStatus { .. }
            | PassAction::ChangeSubscriptionStatus { .. } => {},
        }
    }

    fn fail(state: &mut PassState, error: PassError) -> SmallVec<[Effect<PassAction>; 4]> {
        Self::apply_event(state, &PassAction::ValidationFailed { error });
        SmallVec::new()
    }

    fn write_failed(what: &str, err: &RepositoryError) -> PassAction {
        tracing::error!(error = %err, "Failed to persist {what}");
        PassAction::ValidationFailed {
            error: PassError::WriteFailed(what.to_string()),
        }
    }

    fn reduce_issue(
        state: &mut PassState,
        session: &Session,
        env: &PassEnvironment,
    ) -> SmallVec<[Effect<PassAction>; 4]> {
        if let Err(error) = Self::validate_issue(state, session) {
            return Self::fail(state, error);
        }
        let Some(record) = state.record.as_ref() else {
            return SmallVec::new();
        };

        // Idempotent: an issued token never changes
        if let Some(token) = record.token() {
            let event = PassAction::TokenIssued {
                token: token.clone(),
                data: record.qr_code_data().unwrap_or_default().to_string(),
                fresh: false,
            };
            Self::apply_event(state, &event);
            return SmallVec::new();
        }

        let token = env.tokens.generate();
        let data = match QrPayload::for_record(record, &token).to_json() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize QR payload");
                return Self::fail(state, PassError::WriteFailed("QR payload".to_string()));
            },
        };

        let pass = record.pass_ref();
        let owner = session.user_id;
        let repository = Arc::clone(&env.repository);

        smallvec![async_effect! {
            let action = match repository.attach_token(pass, owner, &token, &data).await {
                Ok(AttachOutcome::Attached) => PassAction::TokenIssued {
                    token,
                    data,
                    fresh: true,
                },
                Ok(AttachOutcome::AlreadyIssued { token, data }) => PassAction::TokenIssued {
                    token,
                    data,
                    fresh: false,
                },
                Ok(AttachOutcome::NotFound) => PassAction::ValidationFailed {
                    error: PassError::NotFound(pass.to_string()),
                },
                Err(e) => Self::write_failed("QR token", &e),
            };
            Some(action)
        }]
    }

    fn reduce_redeem(
        state: &mut PassState,
        session: &Session,
        validator_name: Option<String>,
        env: &PassEnvironment,
    ) -> SmallVec<[Effect<PassAction>; 4]> {
        if !session.can_redeem() {
            return Self::fail(
                state,
                PassError::Unauthorized("Redeeming requires a staff session".to_string()),
            );
        }

        let Some(record) = state.record.as_ref() else {
            let event = PassAction::Verified {
                verdict: Verdict::Rejected(Rejection::UnknownToken),
            };
            Self::apply_event(state, &event);
            return SmallVec::new();
        };

        let now = env.clock.now();
        let verdict = verification::evaluate(record, now);

        let ticket_id = match (record, &verdict) {
            (PassRecord::Ticket(ticket), Verdict::Accepted) => ticket.id,
            // Rejections and subscriptions never write
            _ => {
                Self::apply_event(state, &PassAction::Verified { verdict });
                return SmallVec::new();
            },
        };

        let used_by = validator_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| session.display_name.clone());
        let redemption = Redemption {
            used_at: now,
            used_by,
        };
        let repository = Arc::clone(&env.repository);

        smallvec![async_effect! {
            let action = match repository.mark_redeemed(ticket_id, &redemption).await {
                Ok(RedeemOutcome::Redeemed) => PassAction::TicketRedeemed { redemption },
                Ok(RedeemOutcome::AlreadyRedeemed(winner)) => {
                    PassAction::RedemptionRaceLost { redemption: winner }
                },
                Ok(RedeemOutcome::Rejected(rejection)) => {
                    PassAction::RedemptionRefused { rejection }
                },
                Ok(RedeemOutcome::NotFound) => PassAction::ValidationFailed {
                    error: PassError::NotFound(format!("Ticket {ticket_id}")),
                },
                Err(e) => Self::write_failed("redemption", &e),
            };
            Some(action)
        }]
    }

    fn reduce_reset(
        state: &mut PassState,
        session: &Session,
        env: &PassEnvironment,
    ) -> SmallVec<[Effect<PassAction>; 4]> {
        let previous = match Self::validate_reset(state, session) {
            Ok(previous) => previous,
            Err(error) => return Self::fail(state, error),
        };
        let Some(PassRecord::Ticket(ticket)) = state.record.as_ref() else {
            return SmallVec::new();
        };
        let ticket_id = ticket.id;
        let repository = Arc::clone(&env.repository);

        smallvec![async_effect! {
            let action = match repository.reset_redemption(ticket_id).await {
                Ok(true) => PassAction::RedemptionCleared { previous },
                Ok(false) => PassAction::ValidationFailed {
                    error: PassError::NotRedeemed(ticket_id),
                },
                Err(e) => Self::write_failed("redemption reset", &e),
            };
            Some(action)
        }]
    }

    fn reduce_ticket_status(
        state: &mut PassState,
        session: &Session,
        to: TicketStatus,
        env: &PassEnvironment,
    ) -> SmallVec<[Effect<PassAction>; 4]> {
        if let Err(error) = Self::require_admin(session, "Changing a ticket status") {
            return Self::fail(state, error);
        }
        let (ticket_id, from) = match Self::require_record(state) {
            Ok(PassRecord::Ticket(ticket)) => (ticket.id, ticket.status),
            Ok(PassRecord::Subscription(_)) => {
                return Self::fail(
                    state,
                    PassError::InvalidRequest("Record is not a ticket".to_string()),
                );
            },
            Err(error) => return Self::fail(state, error),
        };
        if !from.can_transition_to(to) {
            return Self::fail(
                state,
                PassError::InvalidTransition {
                    kind: PassKind::Ticket,
                    from: from.as_str(),
                    to: to.as_str(),
                },
            );
        }
        let repository = Arc::clone(&env.repository);

        smallvec![async_effect! {
            let action = match repository.update_ticket_status(ticket_id, from, to).await {
                Ok(true) => PassAction::TicketStatusChanged { from, to },
                // Someone else moved it first
                Ok(false) => PassAction::ValidationFailed {
                    error: PassError::InvalidTransition {
                        kind: PassKind::Ticket,
                        from: from.as_str(),
                        to: to.as_str(),
                    },
                },
                Err(e) => Self::write_failed("ticket status", &e),
            };
            Some(action)
        }]
    }

    fn reduce_subscription_status(
        state: &mut PassState,
        session: &Session,
        to: SubscriptionStatus,
        env: &PassEnvironment,
    ) -> SmallVec<[Effect<PassAction>; 4]> {
        if let Err(error) = Self::require_admin(session, "Changing a subscription status") {
            return Self::fail(state, error);
        }
        let (subscription_id, from) = match Self::require_record(state) {
            Ok(PassRecord::Subscription(subscription)) => (subscription.id, subscription.status),
            Ok(PassRecord::Ticket(_)) => {
                return Self::fail(
                    state,
                    PassError::InvalidRequest("Record is not a subscription".to_string()),
                );
            },
            Err(error) => return Self::fail(state, error),
        };
        if !from.can_transition_to(to) {
            return Self::fail(
                state,
                PassError::InvalidTransition {
                    kind: PassKind::Subscription,
                    from: from.as_str(),
                    to: to.as_str(),
                },
            );
        }
        let repository = Arc::clone(&env.repository);

        smallvec![async_effect! {
            let action = match repository
                .update_subscription_status(subscription_id, from, to)
                .await
            {
                Ok(true) => PassAction::SubscriptionStatusChanged { from, to },
                Ok(false) => PassAction::ValidationFailed {
                    error: PassError::InvalidTransition {
                        kind: PassKind::Subscription,
                        from: from.as_str(),
                        to: to.as_str(),
                    },
                },
                Err(e) => Self::write_failed("subscription status", &e),
            };
            Some(action)
        }]
    }
}

impl Reducer for PassReducer {
    type State = PassState;
    type Action = PassAction;
    type Environment = PassEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            PassAction::IssueToken { session } => Self::reduce_issue(state, &session, env),

            PassAction::VerifyPass => {
                let verdict = state.record.as_ref().map_or(
                    Verdict::Rejected(Rejection::UnknownToken),
                    |record| verification::evaluate(record, env.clock.now()),
                );
                Self::apply_event(state, &PassAction::Verified { verdict });
                SmallVec::new()
            },

            PassAction::RedeemPass {
                session,
                validator_name,
            } => Self::reduce_redeem(state, &session, validator_name, env),

            PassAction::ResetRedemption { session } => Self::reduce_reset(state, &session, env),

            PassAction::ChangeTicketStatus { session, status } => {
                Self::reduce_ticket_status(state, &session, status, env)
            },

            PassAction::ChangeSubscriptionStatus { session, status } => {
                Self::reduce_subscription_status(state, &session, status, env)
            },

            // Events fed back from effects
            event @ (PassAction::TokenIssued { .. }
            | PassAction::Verified { .. }
            | PassAction::TicketRedeemed { .. }
            | PassAction::RedemptionRaceLost { .. }
            | PassAction::RedemptionRefused { .. }
            | PassAction::RedemptionCleared { .. }
            | PassAction::TicketStatusChanged { .. }
            | PassAction::SubscriptionStatusChanged { .. }
            | PassAction::ValidationFailed { .. }) => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}
