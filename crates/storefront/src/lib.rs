//! Marketstall Storefront library.
//!
//! Client-side cart identity and synchronization: an observable cart store,
//! a synchronizer that sequences optimistic mutations against the
//! cart-of-record, identity migration on login and logout, and checkout.
//!
//! # Modules
//!
//! - [`cart`] - Cart store and synchronizer
//! - [`gateway`] - Cart-of-record boundary (REST and in-memory)
//! - [`catalog`] - Product lookups
//! - [`checkout`] - Checkout coordinator, order and payment services
//! - [`identity`] - Anonymous cart token persistence
//! - [`session`] - Wires everything together for one shopper

#![cfg_attr(not(test), forbid(unsafe_code))]

mod api;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod session;

pub use cart::{AuthenticatedUser, CartNotice, CartStore, CartSynchronizer, SyncPhase};
pub use config::StorefrontConfig;
pub use error::{CartError, CheckoutError, ServiceError};
pub use session::StorefrontSession;
