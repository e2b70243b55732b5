//! Dual storage for cart-like collections.
//!
//! Anonymous visitors keep their cart and favorites in the cookie session;
//! signed-in users keep them in `PostgreSQL`. Both sit behind [`ItemStore`],
//! which is bound to a single owner, so the cart service never branches on
//! where the items live.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tower_sessions::Session;

use storehouse_core::{MergeToken, ProductId, UserId};

use super::RepositoryError;
use crate::models::Item;

/// Account-scoped persistence for one kind of [`Item`].
#[async_trait]
pub trait ItemRepository<T: Item>: Send + Sync {
    /// All items for `user`, in insertion order.
    async fn load(&self, user: UserId) -> Result<Vec<T>, RepositoryError>;

    /// Insert or replace the item for its product.
    async fn put(&self, user: UserId, item: &T) -> Result<(), RepositoryError>;

    /// Remove the item for `product`. Returns whether anything was removed.
    async fn delete(&self, user: UserId, product: &ProductId) -> Result<bool, RepositoryError>;

    /// Remove every item for `user`.
    async fn clear(&self, user: UserId) -> Result<(), RepositoryError>;

    /// Fold `incoming` into the user's items with [`Item::merge`], at most
    /// once per `token`.
    ///
    /// Returns `false` when the token was already applied, in which case
    /// nothing is written.
    async fn merge(
        &self,
        user: UserId,
        token: MergeToken,
        incoming: &[T],
    ) -> Result<bool, RepositoryError>;
}

/// Items belonging to one owner, wherever they are stored.
#[async_trait]
pub trait ItemStore<T: Item>: Send + Sync {
    async fn load(&self) -> Result<Vec<T>, RepositoryError>;
    async fn put(&self, item: &T) -> Result<(), RepositoryError>;
    async fn delete(&self, product: &ProductId) -> Result<bool, RepositoryError>;
    async fn clear(&self) -> Result<(), RepositoryError>;
}

/// Items held in the visitor's session under a fixed key.
pub struct SessionItems<T> {
    session: Session,
    key: &'static str,
    token_key: &'static str,
    _item: PhantomData<fn() -> T>,
}

impl<T: Item> SessionItems<T> {
    /// Items stored at `key`, with the merge token kept at `token_key`.
    #[must_use]
    pub const fn new(session: Session, key: &'static str, token_key: &'static str) -> Self {
        Self {
            session,
            key,
            token_key,
            _item: PhantomData,
        }
    }

    async fn save(&self, items: &[T]) -> Result<(), RepositoryError> {
        if items.is_empty() {
            self.session.remove::<serde_json::Value>(self.key).await?;
        } else {
            self.session.insert(self.key, items).await?;
        }
        Ok(())
    }

    /// The token identifying the current local set for merging.
    ///
    /// Minted on first use and kept until the set is cleared, so a merge
    /// retried after a partial failure reuses the same token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Session` if the session cannot be read or written.
    pub async fn merge_token(&self) -> Result<MergeToken, RepositoryError> {
        if let Some(token) = self.session.get::<MergeToken>(self.token_key).await? {
            return Ok(token);
        }
        let token = MergeToken::generate();
        self.session.insert(self.token_key, token).await?;
        Ok(token)
    }
}

#[async_trait]
impl<T: Item> ItemStore<T> for SessionItems<T> {
    async fn load(&self) -> Result<Vec<T>, RepositoryError> {
        Ok(self.session.get::<Vec<T>>(self.key).await?.unwrap_or_default())
    }

    async fn put(&self, item: &T) -> Result<(), RepositoryError> {
        let mut items = self.load().await?;
        match items
            .iter_mut()
            .find(|i| i.product_id() == item.product_id())
        {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        self.save(&items).await
    }

    async fn delete(&self, product: &ProductId) -> Result<bool, RepositoryError> {
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|i| i.product_id() != product);
        let removed = items.len() != before;
        if removed {
            self.save(&items).await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        self.session.remove::<serde_json::Value>(self.key).await?;
        self.session
            .remove::<serde_json::Value>(self.token_key)
            .await?;
        Ok(())
    }
}

/// Items stored for a signed-in user.
pub struct RemoteItems<T> {
    repo: Arc<dyn ItemRepository<T>>,
    user: UserId,
}

impl<T: Item> RemoteItems<T> {
    #[must_use]
    pub fn new(repo: Arc<dyn ItemRepository<T>>, user: UserId) -> Self {
        Self { repo, user }
    }
}

#[async_trait]
impl<T: Item> ItemStore<T> for RemoteItems<T> {
    async fn load(&self) -> Result<Vec<T>, RepositoryError> {
        self.repo.load(self.user).await
    }

    async fn put(&self, item: &T) -> Result<(), RepositoryError> {
        self.repo.put(self.user, item).await
    }

    async fn delete(&self, product: &ProductId) -> Result<bool, RepositoryError> {
        self.repo.delete(self.user, product).await
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        self.repo.clear(self.user).await
    }
}
