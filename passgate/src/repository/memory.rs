//! In-memory pass repository.
//!
//! Used when no `DATABASE_URL` is configured and throughout the tests. All
//! compare-and-set operations run under a single write lock.

use super::{refusal, AttachOutcome, PassRepository, RedeemOutcome, RepositoryError};
use crate::types::{
    PassRecord, PassRef, QrToken, Redemption, Subscription, SubscriptionId, SubscriptionStatus,
    Ticket, TicketId, TicketStatus, UserId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    tickets: HashMap<TicketId, Ticket>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl Tables {
    fn token_in_use(&self, token: &QrToken) -> bool {
        self.tickets
            .values()
            .any(|t| t.qr_code_token.as_ref() == Some(token))
            || self
                .subscriptions
                .values()
                .any(|s| s.qr_code_token.as_ref() == Some(token))
    }
}

/// `HashMap`-backed repository, cheap to clone (clones share storage)
#[derive(Clone, Debug, Default)]
pub struct InMemoryPassRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryPassRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets and subscriptions
    pub async fn len(&self) -> usize {
        let tables = self.tables.read().await;
        tables.tickets.len() + tables.subscriptions.len()
    }

    /// Whether the repository holds no records
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PassRepository for InMemoryPassRepository {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.tickets.contains_key(&ticket.id) {
            return Err(RepositoryError::Duplicate(format!("ticket {}", ticket.id)));
        }
        if let Some(token) = &ticket.qr_code_token {
            if tables.token_in_use(token) {
                return Err(RepositoryError::TokenConflict);
            }
        }
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.subscriptions.contains_key(&subscription.id) {
            return Err(RepositoryError::Duplicate(format!(
                "subscription {}",
                subscription.id
            )));
        }
        if let Some(token) = &subscription.qr_code_token {
            if tables.token_in_use(token) {
                return Err(RepositoryError::TokenConflict);
            }
        }
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find(&self, pass: PassRef) -> Result<Option<PassRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(match pass {
            PassRef::Ticket(id) => tables.tickets.get(&id).cloned().map(PassRecord::Ticket),
            PassRef::Subscription(id) => tables
                .subscriptions
                .get(&id)
                .cloned()
                .map(PassRecord::Subscription),
        })
    }

    async fn find_by_token(
        &self,
        token: &QrToken,
    ) -> Result<Option<PassRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        let ticket = tables
            .tickets
            .values()
            .find(|t| t.qr_code_token.as_ref() == Some(token))
            .cloned()
            .map(PassRecord::Ticket);
        if ticket.is_some() {
            return Ok(ticket);
        }
        Ok(tables
            .subscriptions
            .values()
            .find(|s| s.qr_code_token.as_ref() == Some(token))
            .cloned()
            .map(PassRecord::Subscription))
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<PassRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut records: Vec<(chrono::DateTime<chrono::Utc>, PassRecord)> = tables
            .tickets
            .values()
            .filter(|t| t.owner == owner)
            .map(|t| (t.created_at, PassRecord::Ticket(t.clone())))
            .chain(
                tables
                    .subscriptions
                    .values()
                    .filter(|s| s.owner == owner)
                    .map(|s| (s.created_at, PassRecord::Subscription(s.clone()))),
            )
            .collect();
        records.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    async fn attach_token(
        &self,
        pass: PassRef,
        owner: UserId,
        token: &QrToken,
        data: &str,
    ) -> Result<AttachOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.token_in_use(token) {
            return Err(RepositoryError::TokenConflict);
        }

        let slot = match pass {
            PassRef::Ticket(id) => tables
                .tickets
                .get_mut(&id)
                .filter(|t| t.owner == owner)
                .map(|t| (&mut t.qr_code_token, &mut t.qr_code_data)),
            PassRef::Subscription(id) => tables
                .subscriptions
                .get_mut(&id)
                .filter(|s| s.owner == owner)
                .map(|s| (&mut s.qr_code_token, &mut s.qr_code_data)),
        };

        let Some((stored_token, stored_data)) = slot else {
            return Ok(AttachOutcome::NotFound);
        };

        if let Some(existing) = stored_token.as_ref() {
            return Ok(AttachOutcome::AlreadyIssued {
                token: existing.clone(),
                data: stored_data.clone().unwrap_or_default(),
            });
        }

        *stored_token = Some(token.clone());
        *stored_data = Some(data.to_string());
        Ok(AttachOutcome::Attached)
    }

    async fn mark_redeemed(
        &self,
        ticket: TicketId,
        redemption: &Redemption,
    ) -> Result<RedeemOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.tickets.get_mut(&ticket) else {
            return Ok(RedeemOutcome::NotFound);
        };
        if let Some(refused) = refusal(stored, redemption.used_at) {
            return Ok(refused);
        }
        stored.redemption = Some(redemption.clone());
        Ok(RedeemOutcome::Redeemed)
    }

    async fn reset_redemption(&self, ticket: TicketId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .tickets
            .get_mut(&ticket)
            .and_then(|t| t.redemption.take())
            .is_some())
    }

    async fn update_ticket_status(
        &self,
        ticket: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.tickets.get_mut(&ticket) {
            Some(t) if t.status == from => {
                t.status = to;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn update_subscription_status(
        &self,
        subscription: SubscriptionId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.subscriptions.get_mut(&subscription) {
            Some(s) if s.status == from => {
                s.status = to;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
