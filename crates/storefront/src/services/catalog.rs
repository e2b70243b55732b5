//! Product lookups with an in-process cache.
//!
//! Products are read-only here, so entries are cached for 5 minutes.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use storehouse_core::ProductId;

use super::ServiceError;
use crate::db::{ProductRepository, RepositoryError};
use crate::models::Product;

/// Cached catalogue access.
#[derive(Clone)]
pub struct ProductCatalog {
    inner: Arc<ProductCatalogInner>,
}

struct ProductCatalogInner {
    products: Arc<dyn ProductRepository>,
    cache: Cache<ProductId, Product>,
}

impl ProductCatalog {
    #[must_use]
    pub fn new(products: Arc<dyn ProductRepository>) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            inner: Arc::new(ProductCatalogInner { products, cache }),
        }
    }

    /// Look a product up, serving from cache when possible.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the catalogue cannot be read.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        if let Some(product) = self.inner.cache.get(id).await {
            debug!("Cache hit for product");
            return Ok(Some(product));
        }

        let product = self.inner.products.find(id).await?;
        if let Some(product) = &product {
            self.inner.cache.insert(id.clone(), product.clone()).await;
        }
        Ok(product)
    }

    /// Like [`ProductCatalog::product`] but a missing product is an error.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for unknown products.
    pub async fn require(&self, id: &ProductId) -> Result<Product, ServiceError> {
        self.product(id).await?.ok_or(ServiceError::NotFound)
    }
}
