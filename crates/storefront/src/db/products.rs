//! Read-only product catalogue.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use storehouse_core::ProductId;

use super::RepositoryError;
use crate::models::Product;

/// Catalogue lookups.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: String,
    title: String,
    description: String,
    price: Decimal,
    images: Vec<String>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Self {
            id: ProductId::new(r.id),
            title: r.title,
            description: r.description,
            price: r.price,
            images: r.images,
        }
    }
}

/// `PostgreSQL` catalogue.
#[derive(Clone)]
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn find(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, title, description, price, images
            FROM storefront.product
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Product::from))
    }
}
