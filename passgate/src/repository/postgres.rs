//! `PostgreSQL` pass repository.
//!
//! Compare-and-set operations are single conditional statements
//! (`UPDATE ... WHERE used_at IS NULL`), so concurrent requests on separate
//! connections cannot both win. Token uniqueness across tickets and
//! subscriptions is enforced by the `qr_tokens` table.

use super::{refusal, AttachOutcome, PassRepository, RedeemOutcome, RepositoryError};
use crate::types::{
    Money, PassRecord, PassRef, QrToken, Redemption, Subscription, SubscriptionId,
    SubscriptionStatus, Ticket, TicketId, TicketStatus, UserId,
};
use crate::verification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

const TICKET_COLUMNS: &str = "id, owner_id, amount_cents, currency, status, event_name, \
     valid_until, used_at, used_by, qr_code_token, qr_code_data, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, owner_id, plan, status, current_period_end, \
     qr_code_token, qr_code_data, created_at";

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    owner_id: Uuid,
    amount_cents: i64,
    currency: String,
    status: String,
    event_name: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    used_at: Option<DateTime<Utc>>,
    used_by: Option<String>,
    qr_code_token: Option<String>,
    qr_code_data: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = RepositoryError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| RepositoryError::Corrupt {
            id: row.id.to_string(),
            reason,
        };
        let status = row
            .status
            .parse::<TicketStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let redemption = match (row.used_at, row.used_by) {
            (Some(used_at), Some(used_by)) => Some(Redemption { used_at, used_by }),
            (None, None) => None,
            _ => return Err(corrupt("used_at and used_by disagree".to_string())),
        };

        Ok(Self {
            id: TicketId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            amount: Money::new(row.amount_cents, row.currency),
            status,
            event_name: row.event_name,
            valid_until: row.valid_until,
            redemption,
            qr_code_token: row.qr_code_token.map(QrToken::new),
            qr_code_data: row.qr_code_data,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    owner_id: Uuid,
    plan: String,
    status: String,
    current_period_end: DateTime<Utc>,
    qr_code_token: Option<String>,
    qr_code_data: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = RepositoryError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|e| RepositoryError::Corrupt {
                id: row.id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: SubscriptionId::from_uuid(row.id),
            owner: UserId::from_uuid(row.owner_id),
            plan: row.plan,
            status,
            current_period_end: row.current_period_end,
            qr_code_token: row.qr_code_token.map(QrToken::new),
            qr_code_data: row.qr_code_data,
            created_at: row.created_at,
        })
    }
}

fn storage(context: &str) -> impl FnOnce(sqlx::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::Storage(format!("{context}: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Repository backed by a `PostgreSQL` connection pool
#[derive(Clone, Debug)]
pub struct PostgresPassRepository {
    pool: PgPool,
}

impl PostgresPassRepository {
    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the database is unreachable.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(storage("Failed to connect"))?;
        Ok(Self { pool })
    }

    /// Apply pending migrations from `migrations/`
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>, RepositoryError> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("Failed to load ticket"))?;
        row.map(Ticket::try_from).transpose()
    }

    async fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("Failed to load subscription"))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn reserve_token(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        token: &QrToken,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO qr_tokens (token) VALUES ($1)")
            .bind(token.as_str())
            .execute(&mut **tx)
            .await
            .map(|_| ())
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::TokenConflict
                } else {
                    RepositoryError::Storage(format!("Failed to reserve token: {e}"))
                }
            })
    }
}

#[async_trait]
impl PassRepository for PostgresPassRepository {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage("Failed to begin"))?;
        if let Some(token) = &ticket.qr_code_token {
            Self::reserve_token(&mut tx, token).await?;
        }

        sqlx::query(
            "INSERT INTO tickets (id, owner_id, amount_cents, currency, status, event_name,
                                  valid_until, used_at, used_by, qr_code_token, qr_code_data,
                                  created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.owner.as_uuid())
        .bind(ticket.amount.amount)
        .bind(&ticket.amount.currency)
        .bind(ticket.status.as_str())
        .bind(&ticket.event_name)
        .bind(ticket.valid_until)
        .bind(ticket.redemption.as_ref().map(|r| r.used_at))
        .bind(ticket.redemption.as_ref().map(|r| r.used_by.as_str()))
        .bind(ticket.qr_code_token.as_ref().map(QrToken::as_str))
        .bind(&ticket.qr_code_data)
        .bind(ticket.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Duplicate(format!("ticket {}", ticket.id))
            } else {
                RepositoryError::Storage(format!("Failed to insert ticket: {e}"))
            }
        })?;

        tx.commit().await.map_err(storage("Failed to commit"))
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage("Failed to begin"))?;
        if let Some(token) = &subscription.qr_code_token {
            Self::reserve_token(&mut tx, token).await?;
        }

        sqlx::query(
            "INSERT INTO subscriptions (id, owner_id, plan, status, current_period_end,
                                        qr_code_token, qr_code_data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.owner.as_uuid())
        .bind(&subscription.plan)
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_end)
        .bind(subscription.qr_code_token.as_ref().map(QrToken::as_str))
        .bind(&subscription.qr_code_data)
        .bind(subscription.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Duplicate(format!("subscription {}", subscription.id))
            } else {
                RepositoryError::Storage(format!("Failed to insert subscription: {e}"))
            }
        })?;

        tx.commit().await.map_err(storage("Failed to commit"))
    }

    async fn find(&self, pass: PassRef) -> Result<Option<PassRecord>, RepositoryError> {
        match pass {
            PassRef::Ticket(id) => Ok(self.find_ticket(id).await?.map(PassRecord::Ticket)),
            PassRef::Subscription(id) => Ok(self
                .find_subscription(id)
                .await?
                .map(PassRecord::Subscription)),
        }
    }

    async fn find_by_token(
        &self,
        token: &QrToken,
    ) -> Result<Option<PassRecord>, RepositoryError> {
        let ticket: Option<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE qr_code_token = $1"
        ))
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("Failed to look up token"))?;
        if let Some(row) = ticket {
            return Ok(Some(PassRecord::Ticket(row.try_into()?)));
        }

        let subscription: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE qr_code_token = $1"
        ))
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("Failed to look up token"))?;
        subscription
            .map(|row| row.try_into().map(PassRecord::Subscription))
            .transpose()
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<PassRecord>, RepositoryError> {
        let tickets: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE owner_id = $1"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list tickets"))?;

        let subscriptions: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE owner_id = $1"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("Failed to list subscriptions"))?;

        let mut records = Vec::with_capacity(tickets.len() + subscriptions.len());
        for row in tickets {
            let ticket = Ticket::try_from(row)?;
            records.push((ticket.created_at, PassRecord::Ticket(ticket)));
        }
        for row in subscriptions {
            let subscription = Subscription::try_from(row)?;
            records.push((subscription.created_at, PassRecord::Subscription(subscription)));
        }
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
        let table = match pass {
            PassRef::Ticket(_) => "tickets",
            PassRef::Subscription(_) => "subscriptions",
        };
        let id = match pass {
            PassRef::Ticket(id) => *id.as_uuid(),
            PassRef::Subscription(id) => *id.as_uuid(),
        };

        let mut tx = self.pool.begin().await.map_err(storage("Failed to begin"))?;

        let updated = sqlx::query(&format!(
            "UPDATE {table} SET qr_code_token = $3, qr_code_data = $4
             WHERE id = $1 AND owner_id = $2 AND qr_code_token IS NULL"
        ))
        .bind(id)
        .bind(owner.as_uuid())
        .bind(token.as_str())
        .bind(data)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::TokenConflict
            } else {
                RepositoryError::Storage(format!("Failed to attach token: {e}"))
            }
        })?
        .rows_affected();

        if updated == 1 {
            Self::reserve_token(&mut tx, token).await?;
            tx.commit().await.map_err(storage("Failed to commit"))?;
            return Ok(AttachOutcome::Attached);
        }

        let existing: Option<(Option<String>, Option<String>)> = sqlx::query_as(&format!(
            "SELECT qr_code_token, qr_code_data FROM {table} WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("Failed to read existing token"))?;
        tx.rollback().await.map_err(storage("Failed to roll back"))?;

        Ok(match existing {
            Some((Some(token), data)) => AttachOutcome::AlreadyIssued {
                token: QrToken::new(token),
                data: data.unwrap_or_default(),
            },
            // Row vanished or token cleared between statements; treat as missing
            Some((None, _)) | None => AttachOutcome::NotFound,
        })
    }

    async fn mark_redeemed(
        &self,
        ticket: TicketId,
        redemption: &Redemption,
    ) -> Result<RedeemOutcome, RepositoryError> {
        let accepted: Vec<&'static str> = verification::accepted_ticket_statuses()
            .map(|status| status.as_str())
            .collect();
        let updated = sqlx::query(
            "UPDATE tickets SET used_at = $2, used_by = $3
             WHERE id = $1 AND used_at IS NULL AND status = ANY($4)
               AND (valid_until IS NULL OR valid_until >= $2)",
        )
        .bind(ticket.as_uuid())
        .bind(redemption.used_at)
        .bind(&redemption.used_by)
        .bind(accepted)
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to mark ticket redeemed"))?
        .rows_affected();

        if updated == 1 {
            return Ok(RedeemOutcome::Redeemed);
        }

        let Some(stored) = self.find_ticket(ticket).await? else {
            return Ok(RedeemOutcome::NotFound);
        };
        // Reset between our UPDATE and SELECT; the caller may retry
        refusal(&stored, redemption.used_at).ok_or_else(|| {
            RepositoryError::Storage(format!("Ticket {ticket} changed during redemption"))
        })
    }

    async fn reset_redemption(&self, ticket: TicketId) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE tickets SET used_at = NULL, used_by = NULL
             WHERE id = $1 AND used_at IS NOT NULL",
        )
        .bind(ticket.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to reset redemption"))?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn update_ticket_status(
        &self,
        ticket: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query("UPDATE tickets SET status = $3 WHERE id = $1 AND status = $2")
            .bind(ticket.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage("Failed to update ticket status"))?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn update_subscription_status(
        &self,
        subscription: SubscriptionId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> Result<bool, RepositoryError> {
        let updated =
            sqlx::query("UPDATE subscriptions SET status = $3 WHERE id = $1 AND status = $2")
                .bind(subscription.as_uuid())
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&self.pool)
                .await
                .map_err(storage("Failed to update subscription status"))?
                .rows_affected();
        Ok(updated == 1)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(storage("Database unreachable"))
    }
}
