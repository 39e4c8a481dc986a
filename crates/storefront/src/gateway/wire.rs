//! Request and response bodies of the cart REST boundary.
//!
//! Mutations send `{cartId, items: [{productId, quantity}]}`; every cart
//! response carries the authoritative lines joined with product details.

use marketstall_core::{
    CartIdentity, CartItem, CartToken, CurrencyCode, Price, ProductId, ProductSnapshot, UserId,
    normalize_items,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::RemoteCart;

/// A `{productId, quantity}` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Body for add and update requests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMutationRequest<'a> {
    pub cart_id: &'a str,
    pub items: Vec<WireLine>,
}

/// Body for merge requests.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest<'a> {
    pub guest_cart_id: &'a str,
    pub user_cart_id: &'a str,
}

/// Product details embedded in a cart line.
#[derive(Debug, Clone, Deserialize)]
pub struct WireProduct {
    pub id: ProductId,
    pub title: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// A cart line as returned by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    pub product: WireProduct,
}

/// A cart as returned by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub cart_id: CartToken,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<WireItem>,
}

impl WireItem {
    fn into_item(self, default_currency: CurrencyCode) -> CartItem {
        CartItem {
            product_id: self.product_id,
            quantity: self.quantity,
            unit_price: Price::new(self.unit_price, self.currency.unwrap_or(default_currency)),
            product: ProductSnapshot {
                id: self.product.id,
                title: self.product.title,
                image: self.product.image,
            },
        }
    }
}

impl CartResponse {
    /// Convert the lines into normalized cart items.
    pub fn into_items(self, default_currency: CurrencyCode) -> Vec<CartItem> {
        normalize_items(
            self.items
                .into_iter()
                .map(|item| item.into_item(default_currency))
                .collect(),
        )
    }

    /// Convert into a [`RemoteCart`], resolving the identity kind from the
    /// response's user binding.
    pub fn into_remote_cart(self, default_currency: CurrencyCode) -> RemoteCart {
        let identity = match self.user_id {
            Some(user_id) => CartIdentity::authenticated(self.cart_id.clone(), user_id),
            None => CartIdentity::anonymous(self.cart_id.clone()),
        };
        RemoteCart {
            identity,
            items: self.into_items(default_currency),
        }
    }
}
