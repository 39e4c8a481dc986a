//! Cart identity and line-item model.
//!
//! A [`Cart`] is the client's mirror of the cart-of-record. Its invariants
//! are enforced by [`normalize_items`]: one row per product and no row with a
//! zero quantity.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::id::{ProductId, UserId};
use super::price::{CurrencyCode, Price, PriceError};

/// Opaque cart token issued by the cart-of-record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartToken(String);

impl CartToken {
    /// Wrap a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CartToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who owns a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityKind {
    /// Pre-login visitor; the token lives in client-local storage.
    Anonymous,
    /// Bound to a logged-in user.
    Authenticated {
        /// Owning user.
        user_id: UserId,
    },
}

/// The identity of the one cart active in a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartIdentity {
    /// Cart token.
    pub cart_id: CartToken,
    /// Ownership.
    pub kind: IdentityKind,
}

impl CartIdentity {
    /// An anonymous identity for `cart_id`.
    #[must_use]
    pub const fn anonymous(cart_id: CartToken) -> Self {
        Self {
            cart_id,
            kind: IdentityKind::Anonymous,
        }
    }

    /// An identity bound to `user_id`.
    #[must_use]
    pub const fn authenticated(cart_id: CartToken, user_id: UserId) -> Self {
        Self {
            cart_id,
            kind: IdentityKind::Authenticated { user_id },
        }
    }

    /// Returns true for anonymous identities.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self.kind, IdentityKind::Anonymous)
    }

    /// The owning user, if authenticated.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self.kind {
            IdentityKind::Anonymous => None,
            IdentityKind::Authenticated { user_id } => Some(user_id),
        }
    }
}

/// Product details captured when the line was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Product id.
    pub id: ProductId,
    /// Product title.
    pub title: String,
    /// Image URL.
    pub image: Option<String>,
}

/// A single cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Units, at least 1 in a normalized cart.
    pub quantity: u32,
    /// Unit price as last confirmed by the server.
    pub unit_price: Price,
    /// Display details.
    pub product: ProductSnapshot,
}

impl CartItem {
    /// Price of the whole line.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Overflow`] if the total does not fit.
    pub fn line_total(&self) -> Result<Price, PriceError> {
        self.unit_price.times(self.quantity)
    }
}

/// The client-side cart mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// Active identity.
    pub identity: CartIdentity,
    /// Lines in insertion order.
    pub items: Vec<CartItem>,
    /// Bumped on every write.
    pub version: u64,
}

impl Cart {
    /// An empty cart at version 0.
    #[must_use]
    pub const fn empty(identity: CartIdentity) -> Self {
        Self {
            identity,
            items: Vec::new(),
            version: 0,
        }
    }

    /// Look up the line for a product.
    #[must_use]
    pub fn item(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Quantity of a product, 0 if absent.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.item(product_id).map_or(0, |item| item.quantity)
    }

    /// Total units across all lines.
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true if the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of line totals.
    ///
    /// An empty cart totals zero in `currency`.
    ///
    /// # Errors
    ///
    /// Returns an error if lines use different currencies or the sum overflows.
    pub fn subtotal(&self, currency: CurrencyCode) -> Result<Price, PriceError> {
        self.items
            .iter()
            .try_fold(Price::zero(currency), |acc, item| {
                acc.checked_add(item.line_total()?)
            })
    }
}

/// Enforce the cart invariants on a list of lines.
///
/// Rows for the same product are folded into the first occurrence (quantities
/// summed, the later price wins) and rows with quantity 0 are dropped. Order of
/// first appearance is kept.
#[must_use]
pub fn normalize_items(items: Vec<CartItem>) -> Vec<CartItem> {
    let mut normalized: Vec<CartItem> = Vec::with_capacity(items.len());
    for item in items {
        if let Some(existing) = normalized
            .iter_mut()
            .find(|line| line.product_id == item.product_id)
        {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            existing.unit_price = item.unit_price;
        } else {
            normalized.push(item);
        }
    }
    normalized.retain(|item| item.quantity > 0);
    normalized
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(id: i32, quantity: u32, cents: i64) -> CartItem {
        CartItem {
            product_id: ProductId::new(id),
            quantity,
            unit_price: Price::from_cents(cents, CurrencyCode::USD),
            product: ProductSnapshot {
                id: ProductId::new(id),
                title: format!("Product {id}"),
                image: None,
            },
        }
    }

    #[test]
    fn test_normalize_folds_duplicates() {
        let items = normalize_items(vec![line(1, 2, 100), line(2, 1, 50), line(1, 3, 120)]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_id, ProductId::new(1));
        assert_eq!(items[0].quantity, 5);
        assert_eq!(items[0].unit_price, Price::from_cents(120, CurrencyCode::USD));
    }

    #[test]
    fn test_normalize_drops_zero_quantity() {
        let items = normalize_items(vec![line(1, 0, 100), line(2, 1, 50)]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, ProductId::new(2));
    }

    #[test]
    fn test_subtotal() {
        let cart = Cart {
            identity: CartIdentity::anonymous(CartToken::new("c1")),
            items: vec![line(1, 2, 1000), line(2, 1, 250)],
            version: 3,
        };
        assert_eq!(
            cart.subtotal(CurrencyCode::USD).unwrap(),
            Price::from_cents(2250, CurrencyCode::USD)
        );
        assert_eq!(cart.total_quantity(), 3);
        assert_eq!(cart.quantity_of(ProductId::new(9)), 0);
    }

    #[test]
    fn test_empty_subtotal_is_zero() {
        let cart = Cart::empty(CartIdentity::anonymous(CartToken::new("c1")));
        assert!(cart.subtotal(CurrencyCode::EUR).unwrap().is_zero());
    }

    #[test]
    fn test_identity_kind_wire_format() {
        let identity = CartIdentity::authenticated(CartToken::new("u-cart"), UserId::new(7));
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["kind"]["type"], "authenticated");
        assert_eq!(json["kind"]["user_id"], 7);
        assert_eq!(identity.user_id(), Some(UserId::new(7)));
    }
}
