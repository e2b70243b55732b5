//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::{
    AccountRepository, AddressRepository, CardRepository, DraftRepository, ItemRepository,
    OrderRepository, PgAccountRepository, PgAddressRepository, PgCardRepository,
    PgCartRepository, PgDraftRepository, PgFavoriteRepository, PgOrderRepository,
    PgProductRepository, ProductRepository,
};
use crate::models::{CartLine, FavoriteEntry};
use crate::payments::{PaymentError, PaymentProvider, StripeClient};
use crate::services::{
    AccountService, AddressBook, CartService, CheckoutService, ConfirmationLatch,
    ConfirmationMailer, OrderHistory, PaymentDeps, PaymentOrchestrator, ProductCatalog,
    SmtpMailer,
};

/// Error wiring the production backends.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("payments client: {0}")]
    Payments(#[from] PaymentError),
    #[error("SMTP transport: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Storage and remote collaborators behind the services.
pub struct Backends {
    pub accounts: Arc<dyn AccountRepository>,
    pub addresses: Arc<dyn AddressRepository>,
    pub cards: Arc<dyn CardRepository>,
    pub cart: Arc<dyn ItemRepository<CartLine>>,
    pub favorites: Arc<dyn ItemRepository<FavoriteEntry>>,
    pub drafts: Arc<dyn DraftRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub provider: Arc<dyn PaymentProvider>,
    pub mailer: Arc<dyn ConfirmationMailer>,
}

impl Backends {
    /// `PostgreSQL` repositories, the Stripe API and SMTP delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the payments client or SMTP relay cannot be built.
    pub fn postgres(pool: &PgPool, config: &StorefrontConfig) -> Result<Self, StateError> {
        Ok(Self {
            accounts: Arc::new(PgAccountRepository::new(pool.clone())),
            addresses: Arc::new(PgAddressRepository::new(pool.clone())),
            cards: Arc::new(PgCardRepository::new(pool.clone())),
            cart: Arc::new(PgCartRepository::new(pool.clone())),
            favorites: Arc::new(PgFavoriteRepository::new(pool.clone())),
            drafts: Arc::new(PgDraftRepository::new(pool.clone())),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            products: Arc::new(PgProductRepository::new(pool.clone())),
            provider: Arc::new(StripeClient::new(&config.stripe)?),
            mailer: Arc::new(SmtpMailer::new(&config.email)?),
        })
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`; services are built once at
/// start-up and handed to handlers through it.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    accounts: AccountService,
    carts: CartService,
    catalog: ProductCatalog,
    addresses: AddressBook,
    checkout: CheckoutService,
    payments: PaymentOrchestrator,
    history: OrderHistory,
    cards: Arc<dyn CardRepository>,
    provider: Arc<dyn PaymentProvider>,
    mailer: Arc<dyn ConfirmationMailer>,
    latch: ConfirmationLatch,
}

impl AppState {
    /// Wire every service on top of `backends`.
    #[must_use]
    pub fn from_backends(config: StorefrontConfig, pool: PgPool, backends: Backends) -> Self {
        let Backends {
            accounts,
            addresses,
            cards,
            cart,
            favorites,
            drafts,
            orders,
            products,
            provider,
            mailer,
        } = backends;

        let latch = ConfirmationLatch::new();
        let catalog = ProductCatalog::new(products);
        let carts = CartService::new(cart, favorites);
        let checkout = CheckoutService::new(
            drafts,
            Arc::clone(&addresses),
            Arc::clone(&cards),
            config.checkout.clone(),
        );
        let payments = PaymentOrchestrator::new(
            PaymentDeps {
                provider: Arc::clone(&provider),
                accounts: Arc::clone(&accounts),
                cards: Arc::clone(&cards),
                orders: Arc::clone(&orders),
                mailer: Arc::clone(&mailer),
            },
            carts.clone(),
            checkout.clone(),
            latch.clone(),
            config.checkout.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                accounts: AccountService::new(accounts),
                addresses: AddressBook::new(addresses),
                history: OrderHistory::new(orders, catalog.clone()),
                config,
                pool,
                carts,
                catalog,
                checkout,
                payments,
                cards,
                provider,
                mailer,
                latch,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn accounts(&self) -> &AccountService {
        &self.inner.accounts
    }

    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    #[must_use]
    pub fn catalog(&self) -> &ProductCatalog {
        &self.inner.catalog
    }

    #[must_use]
    pub fn addresses(&self) -> &AddressBook {
        &self.inner.addresses
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentOrchestrator {
        &self.inner.payments
    }

    #[must_use]
    pub fn history(&self) -> &OrderHistory {
        &self.inner.history
    }

    /// Saved card storage.
    #[must_use]
    pub fn cards(&self) -> &Arc<dyn CardRepository> {
        &self.inner.cards
    }

    /// Payments provider used by the `/api` proxy endpoints.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
        &self.inner.provider
    }

    #[must_use]
    pub fn mailer(&self) -> &Arc<dyn ConfirmationMailer> {
        &self.inner.mailer
    }

    /// Guard shared by every confirmation email sender.
    #[must_use]
    pub fn latch(&self) -> &ConfirmationLatch {
        &self.inner.latch
    }
}
