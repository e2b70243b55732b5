//! Order draft storage.
//!
//! Each checkout selection is written as soon as it changes, together with a
//! freshly computed summary, so a reload can pick the draft back up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::warn;

use storehouse_core::{AddressId, DraftId, PaymentMethod, UserId};

use super::RepositoryError;
use crate::models::{CardSelection, OrderDraft, OrderSummary};

/// A single draft selection to overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftField {
    DeliveryAddress(Option<AddressId>),
    BillingAddress(Option<AddressId>),
    /// Changing the method also resets the card choice.
    PaymentMethod {
        method: PaymentMethod,
        card: Option<CardSelection>,
    },
    CardSelection(Option<CardSelection>),
}

/// Order draft persistence.
#[async_trait]
pub trait DraftRepository: Send + Sync {
    async fn find(&self, id: DraftId) -> Result<Option<OrderDraft>, RepositoryError>;

    /// Insert the draft or overwrite every field of an existing one owned by
    /// the same user. Returns `false` if the id belongs to another user.
    async fn upsert(&self, draft: &OrderDraft) -> Result<bool, RepositoryError>;

    /// Overwrite one selection and the summary. Returns `false` if no draft
    /// with this id belongs to `user`.
    async fn update_field(
        &self,
        id: DraftId,
        user: UserId,
        field: &DraftField,
        summary: &OrderSummary,
    ) -> Result<bool, RepositoryError>;

    async fn save_summary(&self, id: DraftId, summary: &OrderSummary)
    -> Result<(), RepositoryError>;

    async fn delete(&self, id: DraftId) -> Result<bool, RepositoryError>;

    /// Point every draft slot of `user` that references `removed` at
    /// `replacement`. Returns the number of drafts touched.
    async fn reassign_address(
        &self,
        user: UserId,
        removed: AddressId,
        replacement: Option<AddressId>,
    ) -> Result<u64, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct DraftRow {
    id: uuid::Uuid,
    user_id: i32,
    delivery_address_id: Option<i32>,
    billing_address_id: Option<i32>,
    payment_method: Option<String>,
    card_selection: Option<serde_json::Value>,
    summary: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DraftRow> for OrderDraft {
    type Error = RepositoryError;

    fn try_from(r: DraftRow) -> Result<Self, Self::Error> {
        let payment_method = r
            .payment_method
            .map(|m| m.parse::<PaymentMethod>())
            .transpose()
            .map_err(RepositoryError::DataCorruption)?;

        let card_selection = r
            .card_selection
            .map(serde_json::from_value::<CardSelection>)
            .transpose()
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid card selection: {e}")))?;

        // An unreadable summary is recoverable: callers recompute it from the cart.
        let summary = r.summary.and_then(|value| {
            serde_json::from_value::<OrderSummary>(value)
                .inspect_err(|e| warn!(draft_id = %r.id, error = %e, "Unreadable draft summary"))
                .ok()
        });

        Ok(Self {
            id: DraftId::new(r.id),
            user_id: UserId::new(r.user_id),
            delivery_address_id: r.delivery_address_id.map(AddressId::new),
            billing_address_id: r.billing_address_id.map(AddressId::new),
            payment_method,
            card_selection,
            summary,
            updated_at: r.updated_at,
        })
    }
}

/// `PostgreSQL` draft storage.
#[derive(Clone)]
pub struct PgDraftRepository {
    pool: PgPool,
}

impl PgDraftRepository {
    /// Create a new draft repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DraftRepository for PgDraftRepository {
    async fn find(&self, id: DraftId) -> Result<Option<OrderDraft>, RepositoryError> {
        let row = sqlx::query_as::<_, DraftRow>(
            r"
            SELECT id, user_id, delivery_address_id, billing_address_id,
                   payment_method, card_selection, summary, updated_at
            FROM storefront.order_draft
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OrderDraft::try_from).transpose()
    }

    async fn upsert(&self, draft: &OrderDraft) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO storefront.order_draft
                (id, user_id, delivery_address_id, billing_address_id,
                 payment_method, card_selection, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET delivery_address_id = EXCLUDED.delivery_address_id,
                billing_address_id = EXCLUDED.billing_address_id,
                payment_method = EXCLUDED.payment_method,
                card_selection = EXCLUDED.card_selection,
                summary = EXCLUDED.summary,
                updated_at = NOW()
            WHERE storefront.order_draft.user_id = EXCLUDED.user_id
            ",
        )
        .bind(draft.id)
        .bind(draft.user_id)
        .bind(draft.delivery_address_id)
        .bind(draft.billing_address_id)
        .bind(draft.payment_method.map(PaymentMethod::as_str))
        .bind(draft.card_selection.as_ref().map(Json))
        .bind(draft.summary.as_ref().map(Json))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_field(
        &self,
        id: DraftId,
        user: UserId,
        field: &DraftField,
        summary: &OrderSummary,
    ) -> Result<bool, RepositoryError> {
        let query = match field {
            DraftField::DeliveryAddress(address) => sqlx::query(
                r"
                UPDATE storefront.order_draft
                SET delivery_address_id = $3, summary = $4, updated_at = NOW()
                WHERE id = $1 AND user_id = $2
                ",
            )
            .bind(id)
            .bind(user)
            .bind(*address)
            .bind(Json(summary)),
            DraftField::BillingAddress(address) => sqlx::query(
                r"
                UPDATE storefront.order_draft
                SET billing_address_id = $3, summary = $4, updated_at = NOW()
                WHERE id = $1 AND user_id = $2
                ",
            )
            .bind(id)
            .bind(user)
            .bind(*address)
            .bind(Json(summary)),
            DraftField::PaymentMethod { method, card } => sqlx::query(
                r"
                UPDATE storefront.order_draft
                SET payment_method = $3, summary = $4, card_selection = $5, updated_at = NOW()
                WHERE id = $1 AND user_id = $2
                ",
            )
            .bind(id)
            .bind(user)
            .bind(method.as_str())
            .bind(Json(summary))
            .bind(card.as_ref().map(Json)),
            DraftField::CardSelection(card) => sqlx::query(
                r"
                UPDATE storefront.order_draft
                SET card_selection = $3, summary = $4, updated_at = NOW()
                WHERE id = $1 AND user_id = $2
                ",
            )
            .bind(id)
            .bind(user)
            .bind(card.as_ref().map(Json))
            .bind(Json(summary)),
        };

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_summary(
        &self,
        id: DraftId,
        summary: &OrderSummary,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE storefront.order_draft
            SET summary = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(Json(summary))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: DraftId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.order_draft WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reassign_address(
        &self,
        user: UserId,
        removed: AddressId,
        replacement: Option<AddressId>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.order_draft
            SET delivery_address_id = CASE WHEN delivery_address_id = $2 THEN $3
                                           ELSE delivery_address_id END,
                billing_address_id = CASE WHEN billing_address_id = $2 THEN $3
                                          ELSE billing_address_id END,
                updated_at = NOW()
            WHERE user_id = $1
              AND (delivery_address_id = $2 OR billing_address_id = $2)
            ",
        )
        .bind(user)
        .bind(removed)
        .bind(replacement)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
