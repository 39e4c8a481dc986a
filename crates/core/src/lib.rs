//! Marketstall Core - Shared types library.
//!
//! This crate provides the types shared by every Marketstall component:
//! - `storefront` - Cart synchronization engine and checkout client
//! - `cli` - Command-line storefront client
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no async runtime. This keeps it usable from tests and from any
//! front end that renders a cart.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, prices, emails, statuses and the cart model

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
