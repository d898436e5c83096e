//! Pass service - the operations behind the HTTP API.
//!
//! Every mutating operation follows the same steps:
//! 1. Load the record from the repository
//! 2. Run the pass reducer in a per-request store until it settles
//! 3. Read the outcome from state
//! 4. Record metrics and invalidate the owner's cached listing

use super::cache::PassCache;
use crate::aggregates::{PassAction, PassEnvironment, PassOutcome, PassReducer, PassState};
use crate::error::PassError;
use crate::metrics;
use crate::repository::RepositoryError;
use crate::session::Session;
use crate::tokens::VerifyLinks;
use crate::types::{
    Money, PassKind, PassRecord, PassRef, QrToken, Redemption, Subscription, SubscriptionId,
    SubscriptionStatus, Ticket, TicketId, TicketStatus, UserId,
};
use crate::verification::Verdict;
use chrono::{DateTime, Utc};
use passgate_runtime::Store;
use std::time::Duration;

/// Default deadline for one operation's store to settle
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// A token as returned to the record's owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    /// Record kind
    pub kind: PassKind,
    /// Token
    pub token: QrToken,
    /// Serialized payload
    pub data: String,
    /// `{origin}/verify?token=...`
    pub verify_url: String,
    /// `{origin}/ticket?token=...`
    pub ticket_url: String,
}

/// Result of verifying or redeeming a token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    /// Whether the token admits entry
    pub verdict: Verdict,
    /// The record as it stands after the operation; `None` for unknown tokens
    pub record: Option<PassRecord>,
}

impl Verification {
    /// Redemption marker on the record, if any
    #[must_use]
    pub fn redemption(&self) -> Option<&Redemption> {
        match &self.record {
            Some(PassRecord::Ticket(ticket)) => ticket.redemption.as_ref(),
            _ => None,
        }
    }
}

/// Input for registering a paid (or pending) ticket
#[derive(Clone, Debug)]
pub struct NewTicket {
    /// Owning user
    pub owner: UserId,
    /// Price
    pub amount: Money,
    /// Initial status
    pub status: TicketStatus,
    /// Event label
    pub event_name: Option<String>,
    /// Validity boundary
    pub valid_until: Option<DateTime<Utc>>,
}

/// Input for registering a subscription
#[derive(Clone, Debug)]
pub struct NewSubscription {
    /// Owning user
    pub owner: UserId,
    /// Plan label
    pub plan: String,
    /// Initial status
    pub status: SubscriptionStatus,
    /// End of the paid period
    pub current_period_end: DateTime<Utc>,
}

/// Runs pass operations against the repository
#[derive(Clone)]
pub struct PassService {
    env: PassEnvironment,
    links: VerifyLinks,
    cache: PassCache,
    operation_timeout: Duration,
}

impl PassService {
    /// Create a new pass service
    #[must_use]
    pub fn new(env: PassEnvironment, links: VerifyLinks) -> Self {
        Self {
            env,
            links,
            cache: PassCache::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Override how long one operation may take to settle
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Keep at most `capacity` owners in the listing cache
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = PassCache::with_capacity(capacity);
        self
    }

    /// The listing cache
    #[must_use]
    pub const fn cache(&self) -> &PassCache {
        &self.cache
    }

    /// Return the record's QR token, attaching a fresh one on first call
    ///
    /// # Errors
    ///
    /// - [`PassError::NotFound`]: no such record, or the caller does not own it
    /// - [`PassError::WriteFailed`]: the token could not be attached; retry
    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    pub async fn issue_token(
        &self,
        session: &Session,
        pass: PassRef,
    ) -> Result<IssuedToken, PassError> {
        let record = self.load(pass).await?;
        let owner = record.owner();

        let state = self
            .run(
                PassState::loaded(record),
                PassAction::IssueToken {
                    session: session.clone(),
                },
            )
            .await?;

        let PassOutcome::Issued { token, data, fresh } = state.result()? else {
            return Err(unexpected_outcome());
        };
        if fresh {
            metrics::record_token_issued(pass.kind());
            self.cache.invalidate(owner).await;
            tracing::info!(%pass, "QR token issued");
        }

        Ok(IssuedToken {
            kind: pass.kind(),
            verify_url: self.links.verify_url(&token),
            ticket_url: self.links.ticket_url(&token),
            token,
            data,
        })
    }

    /// Check whether a token admits entry, without changing anything
    ///
    /// # Errors
    ///
    /// Only storage failures; a bad token is a rejected [`Verdict`].
    #[tracing::instrument(skip_all)]
    pub async fn verify(&self, token: &QrToken) -> Result<Verification, PassError> {
        let verification = self.check(token).await?;
        metrics::record_verification(&verification.verdict);
        Ok(verification)
    }

    /// Public landing page view of a token
    ///
    /// Same determination as [`PassService::verify`]; callers are anonymous.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    #[tracing::instrument(skip_all)]
    pub async fn view(&self, token: &QrToken) -> Result<Verification, PassError> {
        self.check(token).await
    }

    /// Redeem a token at the door
    ///
    /// Tickets are latched on acceptance; subscriptions are admitted on every
    /// call while valid. `validator_name` defaults to the session's display
    /// name.
    ///
    /// # Errors
    ///
    /// - [`PassError::Unauthorized`]: the session is not staff or admin
    /// - [`PassError::WriteFailed`]: the latch could not be written
    #[tracing::instrument(skip(self, session, token), fields(user = %session.user_id))]
    pub async fn redeem(
        &self,
        session: &Session,
        token: &QrToken,
        validator_name: Option<String>,
    ) -> Result<Verification, PassError> {
        let state = self.load_by_token(token).await?;
        let state = self
            .run(
                state,
                PassAction::RedeemPass {
                    session: session.clone(),
                    validator_name,
                },
            )
            .await?;

        let PassOutcome::Checked(verdict) = state.result()? else {
            return Err(unexpected_outcome());
        };
        metrics::record_redemption(&verdict);

        match (&verdict, &state.record) {
            (Verdict::Accepted, Some(record @ PassRecord::Ticket(_))) => {
                self.cache.invalidate(record.owner()).await;
                tracing::info!(pass = %record.pass_ref(), "Ticket redeemed");
            },
            (Verdict::Rejected(rejection), _) => {
                tracing::info!(reason = %rejection, "Redeem rejected");
            },
            (Verdict::Accepted, _) => {},
        }

        Ok(Verification {
            verdict,
            record: state.record,
        })
    }

    /// Clear a ticket's redemption latch
    ///
    /// Returns the marker that was removed.
    ///
    /// # Errors
    ///
    /// - [`PassError::Unauthorized`]: the session is not an admin
    /// - [`PassError::NotFound`]: no such ticket
    /// - [`PassError::NotRedeemed`]: the latch was not set
    #[tracing::instrument(skip(self, session), fields(admin = %session.user_id))]
    pub async fn reset_redemption(
        &self,
        session: &Session,
        ticket: TicketId,
    ) -> Result<Redemption, PassError> {
        let record = self.load(PassRef::Ticket(ticket)).await?;
        let owner = record.owner();

        let state = self
            .run(
                PassState::loaded(record),
                PassAction::ResetRedemption {
                    session: session.clone(),
                },
            )
            .await?;

        let PassOutcome::Reset { previous } = state.result()? else {
            return Err(unexpected_outcome());
        };

        tracing::warn!(
            admin = %session.user_id,
            admin_name = %session.display_name,
            %ticket,
            used_at = %previous.used_at.to_rfc3339(),
            used_by = %previous.used_by,
            "Ticket redemption reset by admin"
        );
        metrics::record_redemption_reset();
        self.cache.invalidate(owner).await;

        Ok(previous)
    }

    /// Register a ticket created by the payment collaborator
    ///
    /// # Errors
    ///
    /// - [`PassError::Unauthorized`]: the session is not an admin
    /// - [`PassError::InvalidRequest`]: negative amount or malformed currency
    #[tracing::instrument(skip(self, session, ticket), fields(owner = %ticket.owner))]
    pub async fn register_ticket(
        &self,
        session: &Session,
        ticket: NewTicket,
    ) -> Result<Ticket, PassError> {
        require_admin(session, "Registering a ticket")?;
        validate_amount(&ticket.amount)?;

        let mut record = Ticket::new(
            ticket.owner,
            ticket.amount,
            ticket.status,
            self.env.clock.now(),
        );
        record.event_name = ticket.event_name.filter(|name| !name.trim().is_empty());
        record.valid_until = ticket.valid_until;

        self.env
            .repository
            .insert_ticket(&record)
            .await
            .map_err(|e| registration_failed("ticket", &e))?;

        metrics::record_pass_registered(PassKind::Ticket);
        self.cache.invalidate(record.owner).await;
        tracing::info!(ticket = %record.id, status = %record.status, "Ticket registered");

        Ok(record)
    }

    /// Register a subscription created by the payment collaborator
    ///
    /// # Errors
    ///
    /// - [`PassError::Unauthorized`]: the session is not an admin
    /// - [`PassError::InvalidRequest`]: empty plan
    #[tracing::instrument(skip(self, session, subscription), fields(owner = %subscription.owner))]
    pub async fn register_subscription(
        &self,
        session: &Session,
        subscription: NewSubscription,
    ) -> Result<Subscription, PassError> {
        require_admin(session, "Registering a subscription")?;
        let plan = subscription.plan.trim();
        if plan.is_empty() {
            return Err(PassError::InvalidRequest("plan must not be empty".to_string()));
        }

        let record = Subscription::new(
            subscription.owner,
            plan,
            subscription.status,
            subscription.current_period_end,
            self.env.clock.now(),
        );

        self.env
            .repository
            .insert_subscription(&record)
            .await
            .map_err(|e| registration_failed("subscription", &e))?;

        metrics::record_pass_registered(PassKind::Subscription);
        self.cache.invalidate(record.owner).await;
        tracing::info!(subscription = %record.id, status = %record.status, "Subscription registered");

        Ok(record)
    }

    /// Move a ticket to a new status
    ///
    /// # Errors
    ///
    /// - [`PassError::Unauthorized`]: the session is not an admin
    /// - [`PassError::NotFound`]: no such ticket
    /// - [`PassError::InvalidTransition`]: not allowed from the current status
    #[tracing::instrument(skip(self, session), fields(admin = %session.user_id))]
    pub async fn update_ticket_status(
        &self,
        session: &Session,
        ticket: TicketId,
        status: TicketStatus,
    ) -> Result<Ticket, PassError> {
        let record = self
            .change_status(
                PassRef::Ticket(ticket),
                PassAction::ChangeTicketStatus {
                    session: session.clone(),
                    status,
                },
            )
            .await?;
        match record {
            PassRecord::Ticket(ticket) => Ok(ticket),
            PassRecord::Subscription(_) => Err(unexpected_outcome()),
        }
    }

    /// Move a subscription to a new status
    ///
    /// # Errors
    ///
    /// Same as [`PassService::update_ticket_status`].
    #[tracing::instrument(skip(self, session), fields(admin = %session.user_id))]
    pub async fn update_subscription_status(
        &self,
        session: &Session,
        subscription: SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<Subscription, PassError> {
        let record = self
            .change_status(
                PassRef::Subscription(subscription),
                PassAction::ChangeSubscriptionStatus {
                    session: session.clone(),
                    status,
                },
            )
            .await?;
        match record {
            PassRecord::Subscription(subscription) => Ok(subscription),
            PassRecord::Ticket(_) => Err(unexpected_outcome()),
        }
    }

    /// The caller's own tickets and subscriptions, newest first
    ///
    /// # Errors
    ///
    /// Only storage failures.
    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    pub async fn list_passes(&self, session: &Session) -> Result<Vec<PassRecord>, PassError> {
        if let Some(records) = self.cache.get(session.user_id).await {
            tracing::trace!("Pass listing served from cache");
            return Ok(records);
        }

        let reservation = self.cache.reserve(session.user_id).await;
        let records = self.env.repository.list_by_owner(session.user_id).await?;
        self.cache
            .fill(session.user_id, reservation, records.clone())
            .await;
        Ok(records)
    }

    async fn change_status(
        &self,
        pass: PassRef,
        action: PassAction,
    ) -> Result<PassRecord, PassError> {
        let record = self.load(pass).await?;
        let owner = record.owner();
        let state = self.run(PassState::loaded(record), action).await?;

        let PassOutcome::StatusChanged = state.result()? else {
            return Err(unexpected_outcome());
        };
        self.cache.invalidate(owner).await;

        let record = state.record.ok_or_else(unexpected_outcome)?;
        tracing::info!(%pass, status = record.status_str(), "Status changed");
        Ok(record)
    }

    async fn check(&self, token: &QrToken) -> Result<Verification, PassError> {
        let state = self.load_by_token(token).await?;
        let state = self.run(state, PassAction::VerifyPass).await?;

        let PassOutcome::Checked(verdict) = state.result()? else {
            return Err(unexpected_outcome());
        };
        tracing::debug!(accepted = verdict.is_accepted(), "Token checked");

        Ok(Verification {
            verdict,
            record: state.record,
        })
    }

    async fn load(&self, pass: PassRef) -> Result<PassRecord, PassError> {
        self.env
            .repository
            .find(pass)
            .await?
            .ok_or_else(|| PassError::NotFound(pass.to_string()))
    }

    async fn load_by_token(&self, token: &QrToken) -> Result<PassState, PassError> {
        Ok(self
            .env
            .repository
            .find_by_token(token)
            .await?
            .map_or_else(PassState::missing, PassState::loaded))
    }

    /// Run one action to completion in a fresh store
    async fn run(&self, state: PassState, action: PassAction) -> Result<PassState, PassError> {
        let store = Store::new(state, PassReducer::new(), self.env.clone());
        store
            .send_with_timeout(action, self.operation_timeout)
            .await?;
        Ok(store.state(PassState::clone).await)
    }
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

fn validate_amount(amount: &Money) -> Result<(), PassError> {
    if amount.amount < 0 {
        return Err(PassError::InvalidRequest(
            "amount must not be negative".to_string(),
        ));
    }
    if amount.currency.len() != 3 || !amount.currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(PassError::InvalidRequest(format!(
            "currency must be a three-letter ISO code, got '{}'",
            amount.currency
        )));
    }
    Ok(())
}

fn registration_failed(what: &str, err: &RepositoryError) -> PassError {
    match err {
        RepositoryError::Duplicate(id) => {
            PassError::InvalidRequest(format!("{what} {id} already exists"))
        },
        other => {
            tracing::error!(error = %other, "Failed to register {what}");
            PassError::WriteFailed(what.to_string())
        },
    }
}

fn unexpected_outcome() -> PassError {
    PassError::Storage("Operation finished with an unexpected outcome".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_must_be_iso_code() {
        assert!(validate_amount(&Money::new(100, "eur")).is_ok());
        assert!(validate_amount(&Money::new(100, "euro")).is_err());
        assert!(validate_amount(&Money::new(100, "E1R")).is_err());
        assert!(validate_amount(&Money::new(-1, "EUR")).is_err());
    }

    #[test]
    fn duplicates_are_invalid_requests() {
        let err = registration_failed("ticket", &RepositoryError::Duplicate("abc".into()));
        assert!(matches!(err, PassError::InvalidRequest(_)));

        let err = registration_failed("ticket", &RepositoryError::Storage("down".into()));
        assert_eq!(err, PassError::WriteFailed("ticket".into()));
    }
}
