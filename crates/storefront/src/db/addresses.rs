//! Address book storage.
//!
//! The "exactly one default per user" rule is maintained here: every write
//! that moves the default does so inside one statement or one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use storehouse_core::{AddressId, UserId};

use super::RepositoryError;
use crate::models::{Address, AddressFields};

/// Outcome of deleting an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRemoval {
    pub user_id: UserId,
    pub removed: AddressId,
    pub was_default: bool,
    /// The address promoted to default, if the removed one was the default
    /// and another remains.
    pub promoted: Option<AddressId>,
}

/// Address book persistence.
#[async_trait]
pub trait AddressRepository: Send + Sync {
    /// Every address of `user`, default first, then by creation.
    async fn list(&self, user: UserId) -> Result<Vec<Address>, RepositoryError>;

    async fn get(&self, user: UserId, id: AddressId) -> Result<Option<Address>, RepositoryError>;

    /// The user's default address, if any.
    async fn default_address(&self, user: UserId) -> Result<Option<Address>, RepositoryError>;

    /// Insert an address. It becomes the default when `fields.is_default` is
    /// set or when it is the user's first address.
    async fn insert(&self, user: UserId, fields: &AddressFields)
    -> Result<Address, RepositoryError>;

    /// Update an address in place. Setting `is_default` promotes it; clearing
    /// it never demotes the current default.
    async fn update(
        &self,
        user: UserId,
        id: AddressId,
        fields: &AddressFields,
    ) -> Result<Option<Address>, RepositoryError>;

    /// Make `id` the only default. Returns `false` if the address does not
    /// belong to `user`.
    async fn set_default(&self, user: UserId, id: AddressId) -> Result<bool, RepositoryError>;

    /// Delete an address, promoting the oldest remaining one if the default
    /// was removed.
    async fn delete(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<Option<AddressRemoval>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: i32,
    name: String,
    phone_number: String,
    street: String,
    city: String,
    county: String,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(r: AddressRow) -> Self {
        Self {
            id: AddressId::new(r.id),
            name: r.name,
            phone_number: r.phone_number,
            street: r.street,
            city: r.city,
            county: r.county,
            is_default: r.is_default,
            created_at: r.created_at,
        }
    }
}

const COLUMNS: &str = "id, name, phone_number, street, city, county, is_default, created_at";

/// Single-statement default switch: every row of the user is rewritten, so
/// no reader sees zero or two defaults.
async fn switch_default(
    conn: &mut PgConnection,
    user: UserId,
    id: AddressId,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        UPDATE storefront.user_address
        SET is_default = (id = $2)
        WHERE user_id = $1
          AND EXISTS (
              SELECT 1 FROM storefront.user_address
              WHERE user_id = $1 AND id = $2
          )
        ",
    )
    .bind(user)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// `PostgreSQL` address book.
#[derive(Clone)]
pub struct PgAddressRepository {
    pool: PgPool,
}

impl PgAddressRepository {
    /// Create a new address repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressRepository for PgAddressRepository {
    async fn list(&self, user: UserId) -> Result<Vec<Address>, RepositoryError> {
        let rows = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.user_address
             WHERE user_id = $1
             ORDER BY is_default DESC, created_at, id"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn get(&self, user: UserId, id: AddressId) -> Result<Option<Address>, RepositoryError> {
        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.user_address WHERE user_id = $1 AND id = $2"
        ))
        .bind(user)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Address::from))
    }

    async fn default_address(&self, user: UserId) -> Result<Option<Address>, RepositoryError> {
        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.user_address
             WHERE user_id = $1 AND is_default
             LIMIT 1"
        ))
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Address::from))
    }

    async fn insert(
        &self,
        user: UserId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serialise address writes per user so two first inserts cannot both
        // see an empty book.
        sqlx::query("SELECT id FROM storefront.user WHERE id = $1 FOR UPDATE")
            .bind(user)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM storefront.user_address WHERE user_id = $1")
                .bind(user)
                .fetch_one(&mut *tx)
                .await?;

        let make_default = fields.is_default || existing == 0;
        if make_default {
            sqlx::query("UPDATE storefront.user_address SET is_default = FALSE WHERE user_id = $1")
                .bind(user)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "INSERT INTO storefront.user_address
                 (user_id, name, phone_number, street, city, county, is_default)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {COLUMNS}"
        ))
        .bind(user)
        .bind(&fields.name)
        .bind(&fields.phone_number)
        .bind(&fields.street)
        .bind(&fields.city)
        .bind(&fields.county)
        .bind(make_default)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn update(
        &self,
        user: UserId,
        id: AddressId,
        fields: &AddressFields,
    ) -> Result<Option<Address>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE storefront.user_address
            SET name = $3, phone_number = $4, street = $5, city = $6, county = $7
            WHERE user_id = $1 AND id = $2
            ",
        )
        .bind(user)
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.phone_number)
        .bind(&fields.street)
        .bind(&fields.city)
        .bind(&fields.county)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if fields.is_default {
            switch_default(&mut tx, user, id).await?;
        }

        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {COLUMNS} FROM storefront.user_address WHERE user_id = $1 AND id = $2"
        ))
        .bind(user)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.into()))
    }

    async fn set_default(&self, user: UserId, id: AddressId) -> Result<bool, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        switch_default(&mut conn, user, id).await
    }

    async fn delete(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<Option<AddressRemoval>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let deleted: Option<(bool,)> = sqlx::query_as(
            r"
            DELETE FROM storefront.user_address
            WHERE user_id = $1 AND id = $2
            RETURNING is_default
            ",
        )
        .bind(user)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((was_default,)) = deleted else {
            tx.rollback().await?;
            return Ok(None);
        };

        let promoted = if was_default {
            let promoted: Option<(i32,)> = sqlx::query_as(
                r"
                UPDATE storefront.user_address
                SET is_default = TRUE
                WHERE id = (
                    SELECT id FROM storefront.user_address
                    WHERE user_id = $1
                    ORDER BY created_at, id
                    LIMIT 1
                )
                RETURNING id
                ",
            )
            .bind(user)
            .fetch_optional(&mut *tx)
            .await?;
            promoted.map(|(id,)| AddressId::new(id))
        } else {
            None
        };

        tx.commit().await?;

        Ok(Some(AddressRemoval {
            user_id: user,
            removed: id,
            was_default,
            promoted,
        }))
    }
}
