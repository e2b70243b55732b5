//! Domain models for the storefront.
//!
//! These types are validated domain objects, separate from database rows and
//! from request/response bodies.

pub mod address;
pub mod cart;
pub mod card;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use address::{Address, AddressFields, AddressSnapshot};
pub use card::{NewSavedCard, SavedCard};
pub use cart::{CartLine, FavoriteEntry, Item, add_to_lines, merge_favorites, merge_lines};
pub use order::{
    CardSelection, ConfirmationSnapshot, NewSubmittedOrder, OrderDraft, OrderSummary,
    OrderedProduct, PaymentMode, SubmittedOrder, SummaryLine,
};
pub use product::{Product, ProductSnapshot};
pub use session::{CurrentUser, keys as session_keys};
pub use user::{User, UserDetails};
