//! Submitted order listing.

use std::sync::Arc;

use tracing::{instrument, warn};

use storehouse_core::UserId;

use super::{ProductCatalog, ServiceError};
use crate::db::OrderRepository;
use crate::models::SubmittedOrder;

/// Image shown when a product image cannot be found.
pub const PLACEHOLDER_IMAGE: &str = "/static/images/placeholder.png";

/// Order history of a user.
#[derive(Clone)]
pub struct OrderHistory {
    orders: Arc<dyn OrderRepository>,
    catalog: ProductCatalog,
}

impl OrderHistory {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderRepository>, catalog: ProductCatalog) -> Self {
        Self { orders, catalog }
    }

    /// Orders of `user`, newest first, with every product line carrying an
    /// image.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the orders cannot be read.
    /// Catalogue failures never fail the listing.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn list_orders(&self, user: UserId) -> Result<Vec<SubmittedOrder>, ServiceError> {
        let mut orders = self.orders.list_for_user(user).await?;

        for order in &mut orders {
            for line in order
                .products_ordered
                .iter_mut()
                .filter(|l| l.image.is_none())
            {
                let image = match self.catalog.product(&line.product_id).await {
                    Ok(product) => product.and_then(|p| p.images.into_iter().next()),
                    Err(e) => {
                        warn!(product_id = %line.product_id, error = %e, "Product lookup failed");
                        None
                    }
                };
                line.image = Some(image.unwrap_or_else(|| PLACEHOLDER_IMAGE.to_owned()));
            }
        }

        Ok(orders)
    }
}
