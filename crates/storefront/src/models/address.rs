//! Address book entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storehouse_core::AddressId;

/// A saved postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub name: String,
    pub phone_number: String,
    pub street: String,
    pub city: String,
    pub county: String,
    /// Exactly one address per user carries this flag while any exist.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    /// Copy of the postal fields, frozen into submitted orders.
    #[must_use]
    pub fn snapshot(&self) -> AddressSnapshot {
        AddressSnapshot {
            name: self.name.clone(),
            phone_number: self.phone_number.clone(),
            street: self.street.clone(),
            city: self.city.clone(),
            county: self.county.clone(),
        }
    }
}

/// Editable address fields as submitted by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AddressFields {
    pub name: String,
    pub phone_number: String,
    pub street: String,
    pub city: String,
    pub county: String,
    pub is_default: bool,
}

impl AddressFields {
    /// Names of required fields that are blank.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("phone_number", &self.phone_number),
            ("street", &self.street),
            ("city", &self.city),
            ("county", &self.county),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }

    /// Trim surrounding whitespace from every text field.
    #[must_use]
    pub fn trimmed(self) -> Self {
        Self {
            name: self.name.trim().to_owned(),
            phone_number: self.phone_number.trim().to_owned(),
            street: self.street.trim().to_owned(),
            city: self.city.trim().to_owned(),
            county: self.county.trim().to_owned(),
            is_default: self.is_default,
        }
    }
}

/// Immutable copy of an address as it was when an order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub name: String,
    pub phone_number: String,
    pub street: String,
    pub city: String,
    pub county: String,
}
