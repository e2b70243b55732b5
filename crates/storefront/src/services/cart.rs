//! Local-first cart and favorites.
//!
//! A visitor's cart lives in the cookie session until they sign in; from then
//! on it lives in `PostgreSQL`. [`CartService`] hands out a cache bound to
//! whichever backend applies, and folds the session set into the account on
//! sign-in.

use std::sync::Arc;

use tower_sessions::Session;
use tracing::{debug, info, instrument, warn};

use storehouse_core::{ProductId, Quantity};

use super::ServiceError;
use crate::db::{ItemRepository, ItemStore, RemoteItems, RepositoryError, SessionItems};
use crate::models::{
    CartLine, CurrentUser, FavoriteEntry, Item, Product, add_to_lines, session_keys as keys,
};

/// Builds cart and favorites caches for a request.
#[derive(Clone)]
pub struct CartService {
    lines: Arc<dyn ItemRepository<CartLine>>,
    favorites: Arc<dyn ItemRepository<FavoriteEntry>>,
}

impl CartService {
    #[must_use]
    pub fn new(
        lines: Arc<dyn ItemRepository<CartLine>>,
        favorites: Arc<dyn ItemRepository<FavoriteEntry>>,
    ) -> Self {
        Self { lines, favorites }
    }

    /// The cart of the signed-in user, or of the anonymous session.
    #[must_use]
    pub fn cart(&self, session: &Session, user: Option<&CurrentUser>) -> CartCache {
        let store: Box<dyn ItemStore<CartLine>> = match user {
            Some(user) => Box::new(RemoteItems::new(Arc::clone(&self.lines), user.id)),
            None => Box::new(cart_session(session)),
        };
        CartCache { store }
    }

    /// The favorites of the signed-in user, or of the anonymous session.
    #[must_use]
    pub fn favorites(&self, session: &Session, user: Option<&CurrentUser>) -> FavoritesCache {
        let store: Box<dyn ItemStore<FavoriteEntry>> = match user {
            Some(user) => Box::new(RemoteItems::new(Arc::clone(&self.favorites), user.id)),
            None => Box::new(favorites_session(session)),
        };
        FavoritesCache { store }
    }

    /// The account's remote cart, for clearing after an order.
    pub(crate) fn lines_repository(&self) -> Arc<dyn ItemRepository<CartLine>> {
        Arc::clone(&self.lines)
    }

    /// Merge the session cart and favorites into the account of `user`.
    ///
    /// Each set is merged under its own token, so a retry after a partial
    /// failure neither double-counts nor loses items. Session items are only
    /// dropped once the remote merge has been confirmed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if either merge fails; the session items are
    /// then left in place.
    #[instrument(skip(self, session, user), fields(user_id = %user.id))]
    pub async fn reconcile_on_sign_in(
        &self,
        session: &Session,
        user: &CurrentUser,
    ) -> Result<(), RepositoryError> {
        reconcile(&cart_session(session), self.lines.as_ref(), user).await?;
        reconcile(&favorites_session(session), self.favorites.as_ref(), user).await?;
        Ok(())
    }
}

fn cart_session(session: &Session) -> SessionItems<CartLine> {
    SessionItems::new(session.clone(), keys::CART_ITEMS, keys::CART_MERGE_TOKEN)
}

fn favorites_session(session: &Session) -> SessionItems<FavoriteEntry> {
    SessionItems::new(
        session.clone(),
        keys::FAVORITE_ITEMS,
        keys::FAVORITE_MERGE_TOKEN,
    )
}

async fn reconcile<T: Item>(
    local: &SessionItems<T>,
    remote: &dyn ItemRepository<T>,
    user: &CurrentUser,
) -> Result<(), RepositoryError> {
    let items = local.load().await?;
    if items.is_empty() {
        return Ok(());
    }

    let token = local.merge_token().await?;
    let applied = remote.merge(user.id, token, &items).await?;
    if applied {
        info!(count = items.len(), "Merged session items into account");
    } else {
        debug!(%token, "Merge token already applied");
    }

    local.clear().await
}

/// A cart bound to its owner's storage.
pub struct CartCache {
    store: Box<dyn ItemStore<CartLine>>,
}

impl CartCache {
    /// Current cart lines.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store cannot be read.
    pub async fn load(&self) -> Result<Vec<CartLine>, RepositoryError> {
        self.store.load().await
    }

    /// Add `quantity` of `product`, topping up an existing line.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store fails.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add(
        &self,
        product: &Product,
        quantity: Quantity,
    ) -> Result<Vec<CartLine>, RepositoryError> {
        let mut lines = self.store.load().await?;
        let line = add_to_lines(&mut lines, product, quantity);
        self.store.put(&line).await?;
        Ok(lines)
    }

    /// Remove the line for `product`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store fails.
    pub async fn remove(&self, product: &ProductId) -> Result<Vec<CartLine>, RepositoryError> {
        if !self.store.delete(product).await? {
            debug!(product_id = %product, "Removing a product that is not in the cart");
        }
        self.store.load().await
    }

    /// Set the quantity of an existing line.
    ///
    /// A product that is not in the cart leaves the cart unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if `quantity` is outside 1..=100.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        product: &ProductId,
        quantity: i64,
    ) -> Result<Vec<CartLine>, ServiceError> {
        let quantity = Quantity::new(quantity).map_err(|_| ServiceError::invalid("quantity"))?;

        let mut lines = self.store.load().await?;
        let Some(line) = lines.iter_mut().find(|l| &l.product_id == product) else {
            warn!(product_id = %product, "Quantity update for a product not in the cart");
            return Ok(lines);
        };

        line.set_quantity(quantity);
        let line = line.clone();
        self.store.put(&line).await?;
        Ok(lines)
    }

    /// Drop every line.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store fails.
    pub async fn clear(&self) -> Result<(), RepositoryError> {
        self.store.clear().await
    }
}

/// Favorites bound to their owner's storage.
pub struct FavoritesCache {
    store: Box<dyn ItemStore<FavoriteEntry>>,
}

impl FavoritesCache {
    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store cannot be read.
    pub async fn load(&self) -> Result<Vec<FavoriteEntry>, RepositoryError> {
        self.store.load().await
    }

    /// Add `product`. Adding it twice keeps a single entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store fails.
    pub async fn add(&self, product: &Product) -> Result<Vec<FavoriteEntry>, RepositoryError> {
        let mut entries = self.store.load().await?;
        if !entries.iter().any(|e| e.product_id == product.id) {
            let entry = FavoriteEntry::new(product);
            self.store.put(&entry).await?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// # Errors
    ///
    /// Returns `RepositoryError` if the backing store fails.
    pub async fn remove(&self, product: &ProductId) -> Result<Vec<FavoriteEntry>, RepositoryError> {
        self.store.delete(product).await?;
        self.store.load().await
    }
}
