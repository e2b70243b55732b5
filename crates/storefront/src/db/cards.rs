//! Saved card storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use storehouse_core::{SavedCardId, UserId};

use super::RepositoryError;
use crate::models::{NewSavedCard, SavedCard};

/// Saved card persistence.
#[async_trait]
pub trait CardRepository: Send + Sync {
    async fn list(&self, user: UserId) -> Result<Vec<SavedCard>, RepositoryError>;

    async fn find_by_token(
        &self,
        user: UserId,
        token: &str,
    ) -> Result<Option<SavedCard>, RepositoryError>;

    /// Store a card. Saving the same token twice refreshes its details.
    async fn insert(&self, user: UserId, card: &NewSavedCard)
    -> Result<SavedCard, RepositoryError>;

    async fn delete(&self, user: UserId, id: SavedCardId) -> Result<bool, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct SavedCardRow {
    id: i32,
    user_id: i32,
    card_token: String,
    brand: String,
    last4: String,
    exp_month: i32,
    exp_year: i32,
    holder_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SavedCardRow> for SavedCard {
    fn from(r: SavedCardRow) -> Self {
        Self {
            id: SavedCardId::new(r.id),
            user_id: UserId::new(r.user_id),
            card_token: r.card_token,
            brand: r.brand,
            last4: r.last4,
            exp_month: r.exp_month,
            exp_year: r.exp_year,
            holder_name: r.holder_name,
            created_at: r.created_at,
        }
    }
}

const COLUMNS: &str =
    "id, user_id, card_token, brand, last4, exp_month, exp_year, holder_name, created_at";

/// `PostgreSQL` saved card storage.
#[derive(Clone)]
pub struct PgCardRepository {
    pool: PgPool,
}

impl PgCardRepository {
    /// Create a new saved card repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardRepository for PgCardRepository {
    async fn list(&self, user: UserId) -> Result<Vec<SavedCard>, RepositoryError> {
        let rows = sqlx::query_as::<_, SavedCardRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.saved_card
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SavedCard::from).collect())
    }

    async fn find_by_token(
        &self,
        user: UserId,
        token: &str,
    ) -> Result<Option<SavedCard>, RepositoryError> {
        let row = sqlx::query_as::<_, SavedCardRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.saved_card WHERE user_id = $1 AND card_token = $2"
        ))
        .bind(user)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SavedCard::from))
    }

    async fn insert(
        &self,
        user: UserId,
        card: &NewSavedCard,
    ) -> Result<SavedCard, RepositoryError> {
        let row = sqlx::query_as::<_, SavedCardRow>(&format!(
            "INSERT INTO storefront.saved_card
                 (user_id, card_token, brand, last4, exp_month, exp_year, holder_name)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id, card_token) DO UPDATE
             SET brand = EXCLUDED.brand,
                 last4 = EXCLUDED.last4,
                 exp_month = EXCLUDED.exp_month,
                 exp_year = EXCLUDED.exp_year,
                 holder_name = EXCLUDED.holder_name
             RETURNING {COLUMNS}"
        ))
        .bind(user)
        .bind(&card.card_token)
        .bind(&card.brand)
        .bind(&card.last4)
        .bind(card.exp_month)
        .bind(card.exp_year)
        .bind(&card.holder_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn delete(&self, user: UserId, id: SavedCardId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.saved_card WHERE user_id = $1 AND id = $2")
            .bind(user)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
