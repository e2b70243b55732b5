//! Storehouse Core - Shared domain types.
//!
//! This crate provides the value types used by the storefront service and the
//! CLI:
//! - `storefront` - Checkout, cart, address book and payment proxy service
//! - `cli` - Command-line tools for migrations
//!
//! # Architecture
//!
//! The core crate contains only types and their validation rules - no I/O,
//! no database access, no HTTP clients. Database encoding is available behind
//! the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, quantities, prices and order statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
