//! Storehouse storefront library.
//!
//! Checkout and order-sync backend: a session-first cart, the address book,
//! order drafts, payment orchestration and order history, served as a JSON
//! API. This crate provides the functionality as a library so the binary
//! and the tests share one router.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;
