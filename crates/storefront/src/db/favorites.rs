//! Signed-in favorites.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use storehouse_core::{MergeToken, ProductId, UserId};

use super::RepositoryError;
use super::cart::claim_merge_token;
use super::items::ItemRepository;
use crate::models::{FavoriteEntry, Item, ProductSnapshot};

#[derive(sqlx::FromRow)]
struct FavoriteRow {
    product_id: String,
    product: Json<ProductSnapshot>,
}

impl From<FavoriteRow> for FavoriteEntry {
    fn from(row: FavoriteRow) -> Self {
        Self {
            product_id: ProductId::new(row.product_id),
            product: row.product.0,
        }
    }
}

async fn insert_favorite(
    conn: &mut PgConnection,
    user: UserId,
    entry: &FavoriteEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO storefront.favorite (user_id, product_id, product)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, product_id) DO UPDATE SET product = EXCLUDED.product
        ",
    )
    .bind(user)
    .bind(&entry.product_id)
    .bind(Json(&entry.product))
    .execute(conn)
    .await?;
    Ok(())
}

/// `PostgreSQL` favorites storage.
#[derive(Clone)]
pub struct PgFavoriteRepository {
    pool: PgPool,
}

impl PgFavoriteRepository {
    /// Create a new favorites repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemRepository<FavoriteEntry> for PgFavoriteRepository {
    async fn load(&self, user: UserId) -> Result<Vec<FavoriteEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, FavoriteRow>(
            r"
            SELECT product_id, product
            FROM storefront.favorite
            WHERE user_id = $1
            ORDER BY created_at, product_id
            ",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FavoriteEntry::from).collect())
    }

    async fn put(&self, user: UserId, entry: &FavoriteEntry) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_favorite(&mut conn, user, entry).await
    }

    async fn delete(&self, user: UserId, product: &ProductId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM storefront.favorite WHERE user_id = $1 AND product_id = $2")
                .bind(user)
                .bind(product)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, user: UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storefront.favorite WHERE user_id = $1")
            .bind(user)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge(
        &self,
        user: UserId,
        token: MergeToken,
        incoming: &[FavoriteEntry],
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if !claim_merge_token(&mut tx, user, token).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        // Union by product: only entries missing remotely need writing.
        let existing = sqlx::query_as::<_, FavoriteRow>(
            r"
            SELECT product_id, product
            FROM storefront.favorite
            WHERE user_id = $1
            FOR UPDATE
            ",
        )
        .bind(user)
        .fetch_all(&mut *tx)
        .await?;
        let existing: Vec<FavoriteEntry> = existing.into_iter().map(FavoriteEntry::from).collect();
        let known = existing.len();

        for entry in FavoriteEntry::merge(existing, incoming).iter().skip(known) {
            insert_favorite(&mut tx, user, entry).await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
