//! Submitted orders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;

use storehouse_core::{DraftId, OrderId, OrderStatus, UserId};

use super::RepositoryError;
use crate::models::{AddressSnapshot, NewSubmittedOrder, OrderedProduct, SubmittedOrder};

/// Submitted order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the order unless one already exists for its draft.
    ///
    /// Returns the stored order and whether this call created it.
    async fn insert_once(
        &self,
        order: &NewSubmittedOrder,
    ) -> Result<(SubmittedOrder, bool), RepositoryError>;

    async fn find_by_draft(&self, draft: DraftId)
    -> Result<Option<SubmittedOrder>, RepositoryError>;

    /// Orders of `user`, newest first.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<SubmittedOrder>, RepositoryError>;

    async fn set_payment_summary(&self, id: OrderId, summary: &str)
    -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i32,
    draft_id: uuid::Uuid,
    user_id: i32,
    order_number: String,
    created_at: DateTime<Utc>,
    status: String,
    delivery_address: Json<AddressSnapshot>,
    billing_address: Json<AddressSnapshot>,
    payment_summary: String,
    products_ordered: Json<Vec<OrderedProduct>>,
    delivery_cost: Decimal,
    order_total: Decimal,
}

impl TryFrom<OrderRow> for SubmittedOrder {
    type Error = RepositoryError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let status = r
            .status
            .parse::<OrderStatus>()
            .map_err(RepositoryError::DataCorruption)?;
        Ok(Self {
            id: OrderId::new(r.id),
            draft_id: DraftId::new(r.draft_id),
            user_id: UserId::new(r.user_id),
            order_number: r.order_number,
            created_at: r.created_at,
            status,
            delivery_address: r.delivery_address.0,
            billing_address: r.billing_address.0,
            payment_summary: r.payment_summary,
            products_ordered: r.products_ordered.0,
            delivery_cost: r.delivery_cost,
            order_total: r.order_total,
        })
    }
}

const COLUMNS: &str = "id, draft_id, user_id, order_number, created_at, status, \
    delivery_address, billing_address, payment_summary, products_ordered, \
    delivery_cost, order_total";

/// `PostgreSQL` order storage.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert_once(
        &self,
        order: &NewSubmittedOrder,
    ) -> Result<(SubmittedOrder, bool), RepositoryError> {
        let inserted = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO storefront.submitted_order
                 (draft_id, user_id, order_number, status, delivery_address,
                  billing_address, payment_summary, products_ordered,
                  delivery_cost, order_total)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (draft_id) DO NOTHING
             RETURNING {COLUMNS}"
        ))
        .bind(order.draft_id)
        .bind(order.user_id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(Json(&order.delivery_address))
        .bind(Json(&order.billing_address))
        .bind(&order.payment_summary)
        .bind(Json(&order.products_ordered))
        .bind(order.delivery_cost)
        .bind(order.order_total)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::conflict_on_unique(e, "order number already exists"))?;

        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let existing = self
            .find_by_draft(order.draft_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok((existing, false))
    }

    async fn find_by_draft(
        &self,
        draft: DraftId,
    ) -> Result<Option<SubmittedOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.submitted_order WHERE draft_id = $1"
        ))
        .bind(draft)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubmittedOrder::try_from).transpose()
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<SubmittedOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.submitted_order
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubmittedOrder::try_from).collect()
    }

    async fn set_payment_summary(
        &self,
        id: OrderId,
        summary: &str,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE storefront.submitted_order SET payment_summary = $2 WHERE id = $1")
                .bind(id)
                .bind(summary)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
