//! Core types for Marketstall.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod checkout;
pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use cart::{
    Cart, CartIdentity, CartItem, CartToken, IdentityKind, ProductSnapshot, normalize_items,
};
pub use checkout::{GuestCheckoutInfo, ShippingAddress};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, Price, PriceError};
pub use status::*;
