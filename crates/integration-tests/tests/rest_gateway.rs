//! REST cart gateway and catalog against the fake store API.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use marketstall_core::{CartIdentity, CartToken, ProductId, UserId, VendorId};
use marketstall_integration_tests::FakeStore;
use marketstall_storefront::catalog::{ProductCatalog, RestCatalog};
use marketstall_storefront::gateway::{CartGateway, GatewayError, OperationToken, RestCartGateway};

async fn setup() -> (FakeStore, RestCartGateway) {
    let store = FakeStore::spawn().await;
    store.add_product(1, "Mug", 450, 5);
    store.add_product(2, "Tee", 1_000, 2);
    let gateway = RestCartGateway::new(&store.config()).unwrap();
    (store, gateway)
}

fn quantities(items: &[marketstall_core::CartItem]) -> Vec<(i32, u32)> {
    items
        .iter()
        .map(|item| (item.product_id.as_i32(), item.quantity))
        .collect()
}

#[tokio::test]
async fn test_create_then_mutate_cart() {
    let (store, gateway) = setup().await;

    let remote = gateway.fetch_or_create(None).await.unwrap();
    assert!(remote.identity.is_anonymous());
    assert!(remote.items.is_empty());
    let identity = remote.identity;

    gateway
        .add_item(&identity, ProductId::new(1), 2, OperationToken::new())
        .await
        .unwrap();
    let items = gateway
        .add_item(&identity, ProductId::new(1), 1, OperationToken::new())
        .await
        .unwrap();
    assert_eq!(quantities(&items), vec![(1, 3)]);
    assert_eq!(items[0].product.title, "Mug");

    let items = gateway
        .update_quantity(&identity, ProductId::new(1), 1, OperationToken::new())
        .await
        .unwrap();
    assert_eq!(quantities(&items), vec![(1, 1)]);

    let items = gateway
        .update_quantity(&identity, ProductId::new(1), 0, OperationToken::new())
        .await
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(
        store.requests_to(
            "DELETE",
            &format!("/store/carts/{}/items/1/", identity.cart_id)
        )
        .len(),
        1
    );

    let fetched = gateway.fetch_or_create(Some(&identity)).await.unwrap();
    assert_eq!(fetched.identity, identity);
    assert!(fetched.items.is_empty());
}

#[tokio::test]
async fn test_unknown_cart_is_invalid_identity() {
    let (_store, gateway) = setup().await;
    let stale = CartIdentity::anonymous(CartToken::new("expired-token"));

    let fetched = gateway.fetch_or_create(Some(&stale)).await;
    assert_eq!(
        fetched.unwrap_err(),
        GatewayError::InvalidIdentity(stale.cart_id.clone())
    );

    let added = gateway
        .add_item(&stale, ProductId::new(1), 1, OperationToken::new())
        .await;
    assert_eq!(
        added.unwrap_err(),
        GatewayError::InvalidIdentity(stale.cart_id.clone())
    );
}

#[tokio::test]
async fn test_out_of_stock_reports_availability() {
    let (_store, gateway) = setup().await;
    let identity = gateway.fetch_or_create(None).await.unwrap().identity;
    gateway
        .add_item(&identity, ProductId::new(2), 1, OperationToken::new())
        .await
        .unwrap();

    let result = gateway
        .add_item(&identity, ProductId::new(2), 5, OperationToken::new())
        .await;

    assert_eq!(
        result.unwrap_err(),
        GatewayError::OutOfStock {
            product_id: ProductId::new(2),
            available: 1
        }
    );
}

#[tokio::test]
async fn test_unknown_product_is_rejected() {
    let (_store, gateway) = setup().await;
    let identity = gateway.fetch_or_create(None).await.unwrap().identity;

    let result = gateway
        .add_item(&identity, ProductId::new(404), 1, OperationToken::new())
        .await;

    assert!(matches!(result, Err(GatewayError::Rejected(msg)) if msg.contains("unknown product")));
}

#[tokio::test]
async fn test_outage_is_retried_with_same_idempotency_key() {
    let (store, gateway) = setup().await;
    let identity = gateway.fetch_or_create(None).await.unwrap().identity;
    store.fail_next(StatusCode::SERVICE_UNAVAILABLE);
    store.fail_next(StatusCode::TOO_MANY_REQUESTS);

    let items = gateway
        .add_item(&identity, ProductId::new(1), 2, OperationToken::new())
        .await
        .unwrap();

    assert_eq!(quantities(&items), vec![(1, 2)]);
    let attempts = store.requests_to("POST", &format!("/store/carts/{}/items/", identity.cart_id));
    assert_eq!(attempts.len(), 3);
    let key = attempts[0].idempotency_key.clone();
    assert!(key.is_some());
    assert!(attempts.iter().all(|r| r.idempotency_key == key));
    assert_eq!(store.cart_lines(identity.cart_id.as_str()), Some(vec![(1, 2)]));
}

#[tokio::test]
async fn test_persistent_outage_is_unreachable() {
    let (store, gateway) = setup().await;
    let identity = gateway.fetch_or_create(None).await.unwrap().identity;
    for _ in 0..3 {
        store.fail_next(StatusCode::BAD_GATEWAY);
    }

    let result = gateway
        .add_item(&identity, ProductId::new(1), 1, OperationToken::new())
        .await;

    assert!(matches!(result, Err(GatewayError::Unreachable(_))));
    assert_eq!(store.cart_lines(identity.cart_id.as_str()), Some(vec![]));
}

#[tokio::test]
async fn test_replayed_operation_applies_once() {
    let (store, gateway) = setup().await;
    let identity = gateway.fetch_or_create(None).await.unwrap().identity;
    let op = OperationToken::new();

    gateway
        .add_item(&identity, ProductId::new(1), 2, op)
        .await
        .unwrap();
    let replayed = gateway
        .add_item(&identity, ProductId::new(1), 2, op)
        .await
        .unwrap();

    assert_eq!(quantities(&replayed), vec![(1, 2)]);
    assert_eq!(store.cart_lines(identity.cart_id.as_str()), Some(vec![(1, 2)]));
}

#[tokio::test]
async fn test_merge_sums_and_caps_at_stock() {
    let (store, gateway) = setup().await;
    store.add_product(3, "Cap", 800, 10);
    store.seed_user_cart("user-cart", 7, &[(2, 2), (3, 1)]);
    let guest = gateway.fetch_or_create(None).await.unwrap().identity;
    gateway
        .add_item(&guest, ProductId::new(1), 2, OperationToken::new())
        .await
        .unwrap();
    gateway
        .add_item(&guest, ProductId::new(2), 1, OperationToken::new())
        .await
        .unwrap();
    let user = CartIdentity::authenticated(CartToken::new("user-cart"), UserId::new(7));

    let items = gateway
        .merge_carts(&guest, &user, OperationToken::new())
        .await
        .unwrap();

    // Tee has only 2 in stock, so 2 + 1 is capped.
    assert_eq!(quantities(&items), vec![(2, 2), (3, 1), (1, 2)]);
    assert_eq!(store.cart_lines(guest.cart_id.as_str()), None);
}

#[tokio::test]
async fn test_clear_empties_cart() {
    let (store, gateway) = setup().await;
    store.seed_user_cart("user-cart", 7, &[(1, 1), (2, 1)]);
    let user = CartIdentity::authenticated(CartToken::new("user-cart"), UserId::new(7));

    let items = gateway.clear(&user, OperationToken::new()).await.unwrap();

    assert!(items.is_empty());
    assert_eq!(store.cart_lines("user-cart"), Some(vec![]));
}

#[tokio::test]
async fn test_catalog_retries_transient_failures() {
    let store = FakeStore::spawn().await;
    store.add_product(1, "Mug", 450, 5);
    let catalog = RestCatalog::new(&store.config()).unwrap();
    store.fail_next(StatusCode::SERVICE_UNAVAILABLE);
    store.fail_next(StatusCode::TOO_MANY_REQUESTS);

    let product = catalog.get_product(ProductId::new(1)).await.unwrap();
    assert_eq!(product.title, "Mug");
    assert_eq!(store.requests_to("GET", "/store/products/1/").len(), 3);

    for _ in 0..3 {
        store.fail_next(StatusCode::BAD_GATEWAY);
    }
    let listed = catalog.list_products(None).await;
    assert!(matches!(
        listed,
        Err(marketstall_storefront::ServiceError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_catalog_caches_single_products() {
    let store = FakeStore::spawn().await;
    store.add_vendor_product(1, "Mug", 450, 5, 1);
    store.add_vendor_product(2, "Tee", 1_000, 0, 2);
    let catalog = RestCatalog::new(&store.config()).unwrap();

    let first = catalog.get_product(ProductId::new(1)).await.unwrap();
    let second = catalog.get_product(ProductId::new(1)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.stock, 5);
    assert_eq!(first.image.as_deref(), Some("https://img.example/1.png"));
    assert_eq!(store.requests_to("GET", "/store/products/1/").len(), 1);

    let all = catalog.list_products(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let vendor = catalog.list_products(Some(VendorId::new(2))).await.unwrap();
    assert_eq!(vendor.len(), 1);
    assert_eq!(vendor[0].title, "Tee");

    let missing = catalog.get_product(ProductId::new(99)).await;
    assert!(matches!(
        missing,
        Err(marketstall_storefront::ServiceError::NotFound(_))
    ));
}
