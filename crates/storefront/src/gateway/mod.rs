//! Cart-of-record gateway.
//!
//! The gateway is the only component that talks to the remote cart service.
//! It turns cart operations into remote calls and normalizes every failure
//! into a [`GatewayError`] kind the synchronizer can match on.
//!
//! # Implementations
//!
//! - [`RestCartGateway`] - the store's REST API over `reqwest`
//! - [`InMemoryCartService`] - an in-process cart-of-record with stock levels,
//!   used by tests and offline demos
//!
//! # Idempotency
//!
//! Every mutating call carries an [`OperationToken`]. Implementations must
//! treat a repeated token as a replay and return the original result without
//! applying the change again.

mod memory;
mod rest;
mod wire;

pub use memory::InMemoryCartService;
pub use rest::RestCartGateway;

use async_trait::async_trait;
use marketstall_core::{CartIdentity, CartItem, CartToken, ProductId};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when interacting with the cart-of-record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network failure, timeout, rate limiting or server-side outage.
    #[error("cart service unreachable: {0}")]
    Unreachable(String),

    /// The server does not have enough stock for the requested quantity.
    #[error("product {product_id} has only {available} in stock")]
    OutOfStock {
        /// Product that ran out.
        product_id: ProductId,
        /// Units the server can still provide.
        available: u32,
    },

    /// The server rejected a stale or unknown cart token.
    #[error("unknown cart: {0}")]
    InvalidIdentity(CartToken),

    /// The server refused the request (validation error).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The response could not be decoded.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Protocol(e.to_string())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// A cart as returned by the cart-of-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCart {
    /// Identity the server resolved.
    pub identity: CartIdentity,
    /// Authoritative line items.
    pub items: Vec<CartItem>,
}

/// Deduplication key attached to each remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationToken(Uuid);

impl OperationToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Header value form of the token.
    #[must_use]
    pub fn as_header_value(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for OperationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote cart operations.
///
/// All methods return the authoritative item list after the operation.
#[async_trait]
pub trait CartGateway: Send + Sync {
    /// Return the remote cart for `persisted`, or provision a new anonymous
    /// cart when no identity is supplied.
    async fn fetch_or_create(
        &self,
        persisted: Option<&CartIdentity>,
    ) -> Result<RemoteCart, GatewayError>;

    /// Add `quantity` units of a product, incrementing an existing line.
    async fn add_item(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError>;

    /// Remove a product's line entirely.
    async fn remove_item(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError>;

    /// Set a line's quantity; 0 removes the line.
    async fn update_quantity(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError>;

    /// Merge the guest cart into the user cart and return the merged lines.
    async fn merge_carts(
        &self,
        guest: &CartIdentity,
        user: &CartIdentity,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError>;

    /// Remove every line from a cart.
    async fn clear(
        &self,
        identity: &CartIdentity,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::OutOfStock {
            product_id: ProductId::new(3),
            available: 2,
        };
        assert_eq!(err.to_string(), "product 3 has only 2 in stock");

        let err = GatewayError::InvalidIdentity(CartToken::new("stale"));
        assert_eq!(err.to_string(), "unknown cart: stale");
    }

    #[test]
    fn test_operation_tokens_are_unique() {
        assert_ne!(OperationToken::new(), OperationToken::new());
        assert_eq!(OperationToken::new().as_header_value().len(), 36);
    }
}
