//! Full storefront sessions against the fake store API.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::StatusCode;
use marketstall_core::{
    CartToken, CurrencyCode, Email, GuestCheckoutInfo, IdentityKind, Price, ProductId,
    ShippingAddress, UserId,
};
use marketstall_integration_tests::FakeStore;
use marketstall_storefront::catalog::ProductCatalog;
use marketstall_storefront::{
    AuthenticatedUser, CartError, CartNotice, CheckoutError, StorefrontSession,
};

fn guest() -> GuestCheckoutInfo {
    GuestCheckoutInfo {
        name: "Ada Buyer".to_string(),
        email: Email::parse("ada@example.com").unwrap(),
        phone: "555-0100".to_string(),
        shipping_address: ShippingAddress {
            line1: "1 Market St".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            region: None,
            postal_code: "12345".to_string(),
            country: "US".to_string(),
        },
    }
}

async fn store() -> FakeStore {
    let store = FakeStore::spawn().await;
    store.add_product(1, "Mug", 450, 10);
    store.add_product(2, "Tee", 1_000, 3);
    store
}

#[tokio::test]
async fn test_anonymous_cart_survives_restart() {
    let store = store().await;
    let config = store.config();

    let session = StorefrontSession::start(&config).await.unwrap();
    session.add_product(ProductId::new(1), 2).await.unwrap();
    let token = session.snapshot().identity.cart_id.clone();
    session.shutdown().await;

    let session = StorefrontSession::start(&config).await.unwrap();
    let cart = session.snapshot();
    assert_eq!(cart.identity.cart_id, token);
    assert_eq!(cart.quantity_of(ProductId::new(1)), 2);
    assert_eq!(store.requests_to("POST", "/store/carts/").len(), 1);
    assert_eq!(store.cart_count(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn test_expired_token_is_replaced() {
    let store = store().await;
    let config = store.config();

    let session = StorefrontSession::start(&config).await.unwrap();
    let old = session.snapshot().identity.cart_id.clone();
    session.shutdown().await;
    store.expire_cart(old.as_str());

    let session = StorefrontSession::start(&config).await.unwrap();
    let new = session.snapshot().identity.cart_id.clone();
    assert_ne!(new, old);
    assert!(store.cart_lines(new.as_str()).is_some());
    session.shutdown().await;

    let session = StorefrontSession::start(&config).await.unwrap();
    assert_eq!(session.snapshot().identity.cart_id, new);
    session.shutdown().await;
}

#[tokio::test]
async fn test_cart_expiring_mid_session_is_recovered() {
    let store = store().await;
    let session = StorefrontSession::start(&store.config()).await.unwrap();
    session.add_product(ProductId::new(1), 1).await.unwrap();
    let old = session.snapshot().identity.cart_id.clone();
    store.expire_cart(old.as_str());

    session.add_product(ProductId::new(2), 1).await.unwrap();

    let cart = session.snapshot();
    assert_ne!(cart.identity.cart_id, old);
    assert_eq!(cart.quantity_of(ProductId::new(2)), 1);
    let notices = session.cart().drain_notices();
    assert!(notices.iter().any(|n| matches!(
        n,
        CartNotice::CartReset { previous, .. } if *previous == old
    )));
    session.shutdown().await;
}

#[tokio::test]
async fn test_out_of_stock_rolls_back() {
    let store = store().await;
    let session = StorefrontSession::start(&store.config()).await.unwrap();
    session.add_product(ProductId::new(2), 2).await.unwrap();
    store.set_stock(2, 2);

    // The catalog still reports 3 in stock, so only the server refuses.
    let result = session.add_product(ProductId::new(2), 1).await;

    assert!(matches!(
        result,
        Err(marketstall_storefront::session::AddProductError::Cart(
            CartError::OutOfStock { available: 0, .. }
        ))
    ));
    assert_eq!(session.snapshot().quantity_of(ProductId::new(2)), 2);
    let refreshed = session.catalog().get_product(ProductId::new(2)).await.unwrap();
    assert_eq!(refreshed.stock, 2);
    assert_eq!(store.requests_to("GET", "/store/products/2/").len(), 2);
    session.shutdown().await;
}

#[tokio::test]
async fn test_optimistic_add_then_remove_settles_empty() {
    let store = store().await;
    let session = StorefrontSession::start(&store.config()).await.unwrap();
    store.set_delay(Some(Duration::from_millis(50)));

    let add = session.queue_add(ProductId::new(1), 1).await.unwrap();
    assert_eq!(session.snapshot().quantity_of(ProductId::new(1)), 1);
    let remove = session.cart().remove_item(ProductId::new(1));
    assert!(session.snapshot().is_empty());

    add.await.unwrap();
    remove.await.unwrap();
    let cart = session.cart().settle().await.unwrap();
    assert!(cart.is_empty());
    assert_eq!(store.cart_lines(cart.identity.cart_id.as_str()), Some(vec![]));
    session.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_server_restores_snapshot() {
    let store = store().await;
    let session = StorefrontSession::start(&store.config()).await.unwrap();
    session.add_product(ProductId::new(1), 1).await.unwrap();
    let before = session.snapshot();
    for _ in 0..3 {
        store.fail_next(StatusCode::SERVICE_UNAVAILABLE);
    }

    let result = session.cart().update_quantity(ProductId::new(1), 4).await;

    assert!(matches!(result, Err(CartError::Unreachable(_))));
    assert_eq!(session.snapshot().items, before.items);
    session.shutdown().await;
}

#[tokio::test]
async fn test_slow_outage_is_absorbed_by_retry() {
    let store = store().await;
    let mut config = store.config();
    config.request_timeout = Duration::from_millis(300);
    let session = StorefrontSession::start(&config).await.unwrap();
    session.add_product(ProductId::new(1), 1).await.unwrap();
    let token = session.snapshot().identity.cart_id.clone();

    // Each attempt fits in one request timeout, but two of them do not.
    store.set_delay(Some(Duration::from_millis(120)));
    store.fail_next(StatusCode::SERVICE_UNAVAILABLE);
    let items = session.add_product(ProductId::new(1), 1).await.unwrap();

    assert_eq!(items[0].quantity, 2);
    assert_eq!(session.snapshot().quantity_of(ProductId::new(1)), 2);
    assert_eq!(store.cart_lines(token.as_str()), Some(vec![(1, 2)]));
    let posts = store.requests_to("POST", &format!("/store/carts/{token}/items/"));
    assert_eq!(posts.len(), 3);
    assert_eq!(posts[1].idempotency_key, posts[2].idempotency_key);
    session.shutdown().await;
}

#[tokio::test]
async fn test_login_merges_guest_cart() {
    let store = store().await;
    store.add_product(3, "Cap", 800, 10);
    store.seed_user_cart("user-cart", 7, &[(2, 2), (3, 1)]);
    let config = store.config();
    let session = StorefrontSession::start(&config).await.unwrap();
    session.add_product(ProductId::new(1), 2).await.unwrap();
    session.add_product(ProductId::new(2), 1).await.unwrap();
    let guest_cart = session.snapshot().identity.cart_id.clone();

    let cart = session
        .cart()
        .login(AuthenticatedUser {
            user_id: UserId::new(7),
            cart_id: CartToken::new("user-cart"),
            email: Some("ada@example.com".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(
        cart.identity.kind,
        IdentityKind::Authenticated {
            user_id: UserId::new(7)
        }
    );
    assert_eq!(cart.quantity_of(ProductId::new(1)), 2);
    assert_eq!(cart.quantity_of(ProductId::new(2)), 3);
    assert_eq!(cart.quantity_of(ProductId::new(3)), 1);
    assert_eq!(store.cart_lines(guest_cart.as_str()), None);
    assert!(!config.identity_file.exists());

    let anonymous = session.cart().logout().await.unwrap();
    assert!(anonymous.identity.is_anonymous());
    assert!(anonymous.is_empty());
    assert!(config.identity_file.exists());
    session.shutdown().await;
}

#[tokio::test]
async fn test_guest_checkout_and_tracking() {
    let store = store().await;
    let session = StorefrontSession::start(&store.config()).await.unwrap();
    session.add_product(ProductId::new(1), 2).await.unwrap();
    session.add_product(ProductId::new(2), 1).await.unwrap();
    let ordered_cart = session.snapshot().identity.cart_id.clone();

    let missing = session.checkout().checkout(None).await;
    assert!(matches!(missing, Err(CheckoutError::MissingGuestInfo)));
    assert_eq!(session.snapshot().total_quantity(), 3);

    let receipt = session.checkout().checkout(Some(guest())).await.unwrap();

    assert_eq!(receipt.total, Price::from_cents(1_900, CurrencyCode::USD));
    assert_eq!(
        store.order_cart(receipt.order_id.as_i32()).as_deref(),
        Some(ordered_cart.as_str())
    );
    let cart = session.snapshot();
    assert!(cart.is_empty());
    assert!(cart.identity.is_anonymous());
    assert_ne!(cart.identity.cart_id, ordered_cart);

    let tracking = receipt.tracking.unwrap();
    let order = session
        .checkout()
        .track_guest_order(tracking.order_id, &Email::parse("ADA@example.com").unwrap())
        .await
        .unwrap();
    assert_eq!(order.total, receipt.total);
    session.shutdown().await;
}

#[tokio::test]
async fn test_declined_payment_keeps_cart() {
    let store = store().await;
    store.set_decline(Some("card_declined"));
    let session = StorefrontSession::start(&store.config()).await.unwrap();
    session.add_product(ProductId::new(1), 1).await.unwrap();
    let before = session.snapshot();

    let result = session.checkout().checkout(Some(guest())).await;

    assert!(matches!(result, Err(CheckoutError::PaymentDeclined(reason)) if reason == "card_declined"));
    assert_eq!(session.snapshot().items, before.items);
    assert_eq!(session.snapshot().identity, before.identity);
    session.shutdown().await;
}
