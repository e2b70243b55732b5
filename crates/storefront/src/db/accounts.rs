//! Account repository: users, password hashes and profile details.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use storehouse_core::{Email, UserId};

use super::RepositoryError;
use crate::models::{User, UserDetails};

/// Account persistence.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create a user with a password hash and optional display name.
    ///
    /// Fails with `RepositoryError::Conflict` if the email is taken.
    async fn create_with_password(
        &self,
        email: &Email,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, RepositoryError>;

    /// The user and password hash for `email`, if the user has a password.
    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError>;

    async fn details(&self, user: UserId) -> Result<UserDetails, RepositoryError>;

    async fn set_payment_customer(
        &self,
        user: UserId,
        customer_id: &str,
    ) -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i32,
    email: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&r.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        Ok(Self {
            id: UserId::new(r.id),
            email,
            created_at: r.created_at,
        })
    }
}

/// `PostgreSQL` accounts.
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new account repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn create_with_password(
        &self,
        email: &Email,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(
            r"
            INSERT INTO storefront.user (email)
            VALUES ($1)
            RETURNING id, email, created_at
            ",
        )
        .bind(email.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::conflict_on_unique(e, "email already exists"))?;

        let user = User::try_from(row)?;

        sqlx::query(
            r"
            INSERT INTO storefront.user_password (user_id, password_hash)
            VALUES ($1, $2)
            ",
        )
        .bind(user.id)
        .bind(password_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO storefront.user_details (user_id, full_name)
            VALUES ($1, $2)
            ",
        )
        .bind(user.id)
        .bind(full_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(user)
    }

    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            #[sqlx(flatten)]
            user: UserRow,
            password_hash: Option<String>,
        }

        let row = sqlx::query_as::<_, Row>(
            r"
            SELECT u.id, u.email, u.created_at, p.password_hash
            FROM storefront.user u
            LEFT JOIN storefront.user_password p ON u.id = p.user_id
            WHERE u.email = $1
            ",
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let Some(password_hash) = r.password_hash else {
            return Ok(None);
        };

        Ok(Some((User::try_from(r.user)?, password_hash)))
    }

    async fn details(&self, user: UserId) -> Result<UserDetails, RepositoryError> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            r"
            SELECT full_name, payment_customer_id
            FROM storefront.user_details
            WHERE user_id = $1
            ",
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map_or_else(UserDetails::default, |(full_name, payment_customer_id)| {
            UserDetails {
                full_name,
                payment_customer_id,
            }
        }))
    }

    async fn set_payment_customer(
        &self,
        user: UserId,
        customer_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.user_details (user_id, payment_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET payment_customer_id = EXCLUDED.payment_customer_id
            ",
        )
        .bind(user)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
