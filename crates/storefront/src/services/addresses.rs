//! Address book.

use std::sync::Arc;

use tracing::{info, instrument};

use storehouse_core::{AddressId, UserId};

use super::ServiceError;
use crate::db::{AddressRemoval, AddressRepository};
use crate::models::{Address, AddressFields};

/// A user's saved addresses, with exactly one default while any exist.
#[derive(Clone)]
pub struct AddressBook {
    repo: Arc<dyn AddressRepository>,
}

impl AddressBook {
    #[must_use]
    pub fn new(repo: Arc<dyn AddressRepository>) -> Self {
        Self { repo }
    }

    /// Addresses of `user`, default first.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the store cannot be read.
    pub async fn list(&self, user: UserId) -> Result<Vec<Address>, ServiceError> {
        Ok(self.repo.list(user).await?)
    }

    /// An address owned by `user`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the address is missing or belongs
    /// to someone else.
    pub async fn get(&self, user: UserId, id: AddressId) -> Result<Address, ServiceError> {
        self.repo.get(user, id).await?.ok_or(ServiceError::NotFound)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::DataAccess` if the store cannot be read.
    pub async fn default_address(&self, user: UserId) -> Result<Option<Address>, ServiceError> {
        Ok(self.repo.default_address(user).await?)
    }

    /// Create an address, or update `id` when given.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` naming every blank field, or
    /// `ServiceError::NotFound` when updating an address the user does not own.
    #[instrument(skip(self, fields), fields(user_id = %user))]
    pub async fn save(
        &self,
        user: UserId,
        id: Option<AddressId>,
        fields: AddressFields,
    ) -> Result<Address, ServiceError> {
        let fields = fields.trimmed();
        let missing = fields.missing_fields();
        if !missing.is_empty() {
            return Err(ServiceError::Validation { missing });
        }

        let address = match id {
            Some(id) => self
                .repo
                .update(user, id, &fields)
                .await?
                .ok_or(ServiceError::NotFound)?,
            None => self.repo.insert(user, &fields).await?,
        };

        info!(address_id = %address.id, is_default = address.is_default, "Address saved");
        Ok(address)
    }

    /// Make `id` the user's only default address.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the address is not the user's.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn set_default(&self, user: UserId, id: AddressId) -> Result<(), ServiceError> {
        if self.repo.set_default(user, id).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound)
        }
    }

    /// Delete an address. If it was the default, the oldest remaining address
    /// takes over.
    ///
    /// The returned removal should be passed to
    /// [`CheckoutSession::release_address`](super::CheckoutSession::release_address).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the address is not the user's.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn delete(
        &self,
        user: UserId,
        id: AddressId,
    ) -> Result<AddressRemoval, ServiceError> {
        let removal = self
            .repo
            .delete(user, id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if let Some(promoted) = removal.promoted {
            info!(address_id = %promoted, "Promoted address to default");
        }
        Ok(removal)
    }
}
