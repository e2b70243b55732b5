//! Signed-in cart lines.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use storehouse_core::{MergeToken, ProductId, Quantity, UserId};

use super::items::ItemRepository;
use super::RepositoryError;
use crate::models::{CartLine, Item, ProductSnapshot};

#[derive(sqlx::FromRow)]
struct CartLineRow {
    product_id: String,
    quantity: i32,
    unit_price: Decimal,
    line_total: Decimal,
    product: Json<ProductSnapshot>,
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = RepositoryError;

    fn try_from(row: CartLineRow) -> Result<Self, Self::Error> {
        let quantity = Quantity::new(i64::from(row.quantity)).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid cart quantity: {e}"))
        })?;
        Ok(Self {
            product_id: ProductId::new(row.product_id),
            quantity,
            unit_price: row.unit_price,
            line_total: row.line_total,
            product: row.product.0,
        })
    }
}

/// Record `token` as applied for `user`. Returns `false` if it already was.
pub(super) async fn claim_merge_token(
    conn: &mut PgConnection,
    user: UserId,
    token: MergeToken,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        INSERT INTO storefront.cart_merge (token, user_id)
        VALUES ($1, $2)
        ON CONFLICT (token) DO NOTHING
        ",
    )
    .bind(token)
    .bind(user)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn upsert_line(
    conn: &mut PgConnection,
    user: UserId,
    line: &CartLine,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO storefront.cart_line
            (user_id, product_id, quantity, unit_price, line_total, product)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, product_id) DO UPDATE
        SET quantity = EXCLUDED.quantity,
            unit_price = EXCLUDED.unit_price,
            line_total = EXCLUDED.line_total,
            product = EXCLUDED.product,
            updated_at = NOW()
        ",
    )
    .bind(user)
    .bind(&line.product_id)
    .bind(i32::from(line.quantity))
    .bind(line.unit_price)
    .bind(line.line_total)
    .bind(Json(&line.product))
    .execute(conn)
    .await?;
    Ok(())
}

/// `PostgreSQL` cart storage.
#[derive(Clone)]
pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_with(
        conn: &mut PgConnection,
        user: UserId,
        lock: bool,
    ) -> Result<Vec<CartLine>, RepositoryError> {
        let sql = if lock {
            r"
            SELECT product_id, quantity, unit_price, line_total, product
            FROM storefront.cart_line
            WHERE user_id = $1
            ORDER BY created_at, product_id
            FOR UPDATE
            "
        } else {
            r"
            SELECT product_id, quantity, unit_price, line_total, product
            FROM storefront.cart_line
            WHERE user_id = $1
            ORDER BY created_at, product_id
            "
        };
        let rows = sqlx::query_as::<_, CartLineRow>(sql)
            .bind(user)
            .fetch_all(conn)
            .await?;
        rows.into_iter().map(CartLine::try_from).collect()
    }
}

#[async_trait]
impl ItemRepository<CartLine> for PgCartRepository {
    async fn load(&self, user: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::load_with(&mut conn, user, false).await
    }

    async fn put(&self, user: UserId, line: &CartLine) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_line(&mut conn, user, line).await
    }

    async fn delete(&self, user: UserId, product: &ProductId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM storefront.cart_line
            WHERE user_id = $1 AND product_id = $2
            ",
        )
        .bind(user)
        .bind(product)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, user: UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storefront.cart_line WHERE user_id = $1")
            .bind(user)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge(
        &self,
        user: UserId,
        token: MergeToken,
        incoming: &[CartLine],
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if !claim_merge_token(&mut tx, user, token).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let existing = Self::load_with(&mut tx, user, true).await?;
        for line in CartLine::merge(existing, incoming) {
            upsert_line(&mut tx, user, &line).await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
