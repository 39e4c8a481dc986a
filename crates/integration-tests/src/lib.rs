//! Integration tests for Marketstall.
//!
//! [`FakeStore`] is an in-process cart-of-record speaking the store REST API
//! (carts, products, orders and payment intents) on an ephemeral port. Tests
//! point a [`StorefrontConfig`] at it and drive the real REST clients.
//!
//! The fake records every request, replays responses for a repeated
//! `Idempotency-Key` and can be told to fail or slow down upcoming requests.

#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use marketstall_storefront::StorefrontConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

/// A request as the fake saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeProduct {
    title: String,
    price: Decimal,
    stock: u32,
    vendor: i32,
}

#[derive(Debug, Clone, Default)]
struct FakeCart {
    user_id: Option<i32>,
    lines: Vec<(i32, u32)>,
}

impl FakeCart {
    fn quantity_of(&self, product_id: i32) -> u32 {
        self.lines
            .iter()
            .find(|(id, _)| *id == product_id)
            .map_or(0, |(_, qty)| *qty)
    }

    fn set(&mut self, product_id: i32, quantity: u32) {
        if quantity == 0 {
            self.lines.retain(|(id, _)| *id != product_id);
        } else if let Some(line) = self.lines.iter_mut().find(|(id, _)| *id == product_id) {
            line.1 = quantity;
        } else {
            self.lines.push((product_id, quantity));
        }
    }
}

#[derive(Debug, Clone)]
struct FakeOrder {
    id: i32,
    total: Decimal,
    currency: String,
    email: Option<String>,
    cart_id: String,
}

#[derive(Debug, Clone)]
struct FakeIntent {
    order_id: i32,
    amount: Decimal,
    currency: String,
    status: &'static str,
    decline_reason: Option<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    products: BTreeMap<i32, FakeProduct>,
    carts: HashMap<String, FakeCart>,
    orders: Vec<FakeOrder>,
    intents: HashMap<String, FakeIntent>,
    replays: HashMap<String, (StatusCode, Bytes)>,
    failures: VecDeque<StatusCode>,
    requests: Vec<RecordedRequest>,
    delay: Option<Duration>,
    decline: Option<String>,
}

type Shared = Arc<Mutex<FakeState>>;

fn lock(state: &Shared) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running fake store API.
pub struct FakeStore {
    address: SocketAddr,
    state: Shared,
}

impl FakeStore {
    /// Bind an ephemeral port and start serving.
    pub async fn spawn() -> Self {
        let state: Shared = Arc::default();
        let app = router(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let address = listener.local_addr().expect("listener has no address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { address, state }
    }

    /// Base URL of the store API, with trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/store/", self.address)
    }

    /// Configuration pointing at this fake, with a fresh identity file.
    #[must_use]
    pub fn config(&self) -> StorefrontConfig {
        let mut config =
            StorefrontConfig::for_api_url(&self.base_url()).expect("fake base URL is valid");
        config.identity_file = temp_identity_file();
        config.request_timeout = Duration::from_secs(2);
        config
    }

    pub fn add_product(&self, id: i32, title: &str, cents: i64, stock: u32) {
        self.add_vendor_product(id, title, cents, stock, 1);
    }

    pub fn add_vendor_product(&self, id: i32, title: &str, cents: i64, stock: u32, vendor: i32) {
        lock(&self.state).products.insert(
            id,
            FakeProduct {
                title: title.to_string(),
                price: Decimal::new(cents, 2),
                stock,
                vendor,
            },
        );
    }

    pub fn set_stock(&self, id: i32, stock: u32) {
        if let Some(product) = lock(&self.state).products.get_mut(&id) {
            product.stock = stock;
        }
    }

    /// Answer the next request with `status` before it reaches a handler.
    pub fn fail_next(&self, status: StatusCode) {
        lock(&self.state).failures.push_back(status);
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        lock(&self.state).delay = delay;
    }

    /// Decline payment confirmations with `reason`.
    pub fn set_decline(&self, reason: Option<&str>) {
        lock(&self.state).decline = reason.map(str::to_string);
    }

    /// Create a cart bound to a user.
    pub fn seed_user_cart(&self, token: &str, user_id: i32, lines: &[(i32, u32)]) {
        lock(&self.state).carts.insert(
            token.to_string(),
            FakeCart {
                user_id: Some(user_id),
                lines: lines.to_vec(),
            },
        );
    }

    /// Forget a cart, as if it had expired.
    pub fn expire_cart(&self, token: &str) {
        lock(&self.state).carts.remove(token);
    }

    /// Server-side lines of a cart, in insertion order.
    #[must_use]
    pub fn cart_lines(&self, token: &str) -> Option<Vec<(i32, u32)>> {
        lock(&self.state)
            .carts
            .get(token)
            .map(|cart| cart.lines.clone())
    }

    #[must_use]
    pub fn cart_count(&self) -> usize {
        lock(&self.state).carts.len()
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        lock(&self.state).orders.len()
    }

    /// Cart an order was placed from.
    #[must_use]
    pub fn order_cart(&self, order_id: i32) -> Option<String> {
        lock(&self.state)
            .orders
            .iter()
            .find(|order| order.id == order_id)
            .map(|order| order.cart_id.clone())
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Requests whose method and path match.
    #[must_use]
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

/// A unique identity file path under the system temp directory.
#[must_use]
pub fn temp_identity_file() -> PathBuf {
    std::env::temp_dir()
        .join(format!("marketstall-it-{}", Uuid::new_v4()))
        .join("cart.json")
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/store/carts/", post(create_cart))
        .route("/store/carts/merge/", post(merge_carts))
        .route("/store/carts/{token}/", get(get_cart))
        .route(
            "/store/carts/{token}/items/",
            post(add_items).patch(set_items).delete(clear_items),
        )
        .route(
            "/store/carts/{token}/items/{product_id}/",
            axum::routing::delete(remove_item),
        )
        .route("/store/products/", get(list_products))
        .route("/store/products/{id}/", get(get_product))
        .route("/store/vendors/{id}/products/", get(vendor_products))
        .route("/store/orders/", post(create_order))
        .route("/store/orders/guest/{id}/", get(guest_order))
        .route("/store/payments/intents/", post(create_intent))
        .route("/store/payments/intents/{id}/confirm/", post(confirm_intent))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            record_and_replay,
        ))
        .with_state(state)
}

/// Record the request, apply injected failures and delays, and replay
/// responses for a repeated idempotency key.
async fn record_and_replay(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let key = request
        .headers()
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let (failure, delay, replay) = {
        let mut s = lock(&state);
        s.requests.push(RecordedRequest {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            idempotency_key: key.clone(),
        });
        let replay = key.as_ref().and_then(|k| s.replays.get(k).cloned());
        (s.failures.pop_front(), s.delay, replay)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = failure {
        return error(status, json!({"detail": "injected failure"}));
    }
    if let Some((status, body)) = replay {
        return json_bytes(status, body);
    }

    let response = next.run(request).await;
    let Some(key) = key else {
        return response;
    };

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    lock(&state).replays.insert(key, (status, body.clone()));
    json_bytes(status, body)
}

fn json_bytes(status: StatusCode, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn cart_json(state: &FakeState, token: &str, cart: &FakeCart) -> Value {
    let items: Vec<Value> = cart
        .lines
        .iter()
        .filter_map(|(id, qty)| {
            let product = state.products.get(id)?;
            Some(json!({
                "productId": id,
                "quantity": qty,
                "unitPrice": product.price,
                "product": {"id": id, "title": product.title, "image": null},
            }))
        })
        .collect();
    json!({"cartId": token, "userId": cart.user_id, "items": items})
}

fn product_json(id: i32, product: &FakeProduct) -> Value {
    json!({
        "id": id,
        "title": product.title,
        "unit_price": product.price,
        "inventory": product.stock,
        "images": [{"image": format!("https://img.example/{id}.png")}],
        "vendor": product.vendor,
    })
}

fn out_of_stock(product_id: i32, available: u32) -> Response {
    error(
        StatusCode::CONFLICT,
        json!({
            "code": "out_of_stock",
            "detail": "Not enough stock",
            "productId": product_id,
            "available": available,
        }),
    )
}

fn missing_cart(token: &str) -> Response {
    error(
        StatusCode::NOT_FOUND,
        json!({"detail": format!("cart {token} not found")}),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinePayload {
    product_id: i32,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct LinesPayload {
    items: Vec<LinePayload>,
}

async fn create_cart(State(state): State<Shared>) -> Response {
    let mut s = lock(&state);
    let token = Uuid::new_v4().to_string();
    let cart = FakeCart::default();
    let body = cart_json(&s, &token, &cart);
    s.carts.insert(token, cart);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_cart(State(state): State<Shared>, Path(token): Path<String>) -> Response {
    let s = lock(&state);
    match s.carts.get(&token) {
        Some(cart) => Json(cart_json(&s, &token, cart)).into_response(),
        None => missing_cart(&token),
    }
}

/// Apply line changes; `absolute` sets quantities, otherwise adds to them.
fn change_lines(state: &Shared, token: &str, items: &[LinePayload], absolute: bool) -> Response {
    let mut s = lock(state);
    let Some(mut cart) = s.carts.get(token).cloned() else {
        return missing_cart(token);
    };
    for line in items {
        let Some(product) = s.products.get(&line.product_id) else {
            return error(
                StatusCode::BAD_REQUEST,
                json!({"detail": format!("unknown product {}", line.product_id)}),
            );
        };
        let current = cart.quantity_of(line.product_id);
        let target = if absolute {
            line.quantity
        } else {
            current + line.quantity
        };
        if target > product.stock {
            let available = if absolute {
                product.stock
            } else {
                product.stock.saturating_sub(current)
            };
            return out_of_stock(line.product_id, available);
        }
        cart.set(line.product_id, target);
    }
    let body = cart_json(&s, token, &cart);
    s.carts.insert(token.to_string(), cart);
    Json(body).into_response()
}

async fn add_items(
    State(state): State<Shared>,
    Path(token): Path<String>,
    Json(payload): Json<LinesPayload>,
) -> Response {
    change_lines(&state, &token, &payload.items, false)
}

async fn set_items(
    State(state): State<Shared>,
    Path(token): Path<String>,
    Json(payload): Json<LinesPayload>,
) -> Response {
    change_lines(&state, &token, &payload.items, true)
}

async fn remove_item(
    State(state): State<Shared>,
    Path((token, product_id)): Path<(String, i32)>,
) -> Response {
    let mut s = lock(&state);
    let Some(mut cart) = s.carts.get(&token).cloned() else {
        return missing_cart(&token);
    };
    cart.set(product_id, 0);
    let body = cart_json(&s, &token, &cart);
    s.carts.insert(token, cart);
    Json(body).into_response()
}

async fn clear_items(State(state): State<Shared>, Path(token): Path<String>) -> Response {
    let mut s = lock(&state);
    let Some(mut cart) = s.carts.get(&token).cloned() else {
        return missing_cart(&token);
    };
    cart.lines.clear();
    let body = cart_json(&s, &token, &cart);
    s.carts.insert(token, cart);
    Json(body).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergePayload {
    guest_cart_id: String,
    user_cart_id: String,
}

async fn merge_carts(State(state): State<Shared>, Json(payload): Json<MergePayload>) -> Response {
    let mut s = lock(&state);
    let Some(guest) = s.carts.get(&payload.guest_cart_id).cloned() else {
        return missing_cart(&payload.guest_cart_id);
    };
    let Some(mut user) = s.carts.get(&payload.user_cart_id).cloned() else {
        return missing_cart(&payload.user_cart_id);
    };

    for (product_id, qty) in guest.lines {
        let stock = s.products.get(&product_id).map_or(0, |p| p.stock);
        let merged = (user.quantity_of(product_id) + qty).min(stock);
        user.set(product_id, merged);
    }

    s.carts.remove(&payload.guest_cart_id);
    let body = cart_json(&s, &payload.user_cart_id, &user);
    s.carts.insert(payload.user_cart_id, user);
    Json(body).into_response()
}

async fn get_product(State(state): State<Shared>, Path(id): Path<i32>) -> Response {
    let s = lock(&state);
    match s.products.get(&id) {
        Some(product) => Json(product_json(id, product)).into_response(),
        None => error(StatusCode::NOT_FOUND, json!({"detail": "Not found."})),
    }
}

async fn list_products(State(state): State<Shared>) -> Response {
    let s = lock(&state);
    let results: Vec<Value> = s
        .products
        .iter()
        .map(|(id, product)| product_json(*id, product))
        .collect();
    Json(json!({"count": results.len(), "next": null, "results": results})).into_response()
}

async fn vendor_products(State(state): State<Shared>, Path(vendor): Path<i32>) -> Response {
    let s = lock(&state);
    let results: Vec<Value> = s
        .products
        .iter()
        .filter(|(_, product)| product.vendor == vendor)
        .map(|(id, product)| product_json(*id, product))
        .collect();
    Json(Value::Array(results)).into_response()
}

#[derive(Debug, Deserialize)]
struct GuestPayload {
    email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    cart_id: String,
    #[serde(default)]
    guest: Option<GuestPayload>,
    total: Decimal,
    currency: String,
}

fn order_json(order: &FakeOrder) -> Value {
    json!({
        "id": order.id,
        "status": "pending",
        "total": order.total,
        "currency": order.currency,
        "email": order.email,
        "placedAt": "2026-10-19T12:00:00Z",
    })
}

async fn create_order(State(state): State<Shared>, Json(payload): Json<OrderPayload>) -> Response {
    let mut s = lock(&state);
    let id = i32::try_from(s.orders.len() + 1).unwrap_or(i32::MAX);
    let order = FakeOrder {
        id,
        total: payload.total,
        currency: payload.currency,
        email: payload.guest.map(|guest| guest.email),
        cart_id: payload.cart_id,
    };
    let body = order_json(&order);
    s.orders.push(order);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn guest_order(
    State(state): State<Shared>,
    Path(id): Path<i32>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let s = lock(&state);
    let email = query.get("email").map(|e| e.to_lowercase());
    s.orders
        .iter()
        .find(|order| {
            order.id == id && order.email.as_ref().map(|e| e.to_lowercase()) == email
        })
        .map_or_else(
            || error(StatusCode::NOT_FOUND, json!({"detail": "Not found."})),
            |order| Json(order_json(order)).into_response(),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentPayload {
    order_id: i32,
    amount: Decimal,
    currency: String,
}

fn intent_json(id: &str, intent: &FakeIntent) -> Value {
    json!({
        "id": id,
        "orderId": intent.order_id,
        "amount": intent.amount,
        "currency": intent.currency,
        "status": intent.status,
        "declineReason": intent.decline_reason,
    })
}

async fn create_intent(State(state): State<Shared>, Json(payload): Json<IntentPayload>) -> Response {
    let mut s = lock(&state);
    let id = format!("pi_{}", s.intents.len() + 1);
    let intent = FakeIntent {
        order_id: payload.order_id,
        amount: payload.amount,
        currency: payload.currency,
        status: "requires_confirmation",
        decline_reason: None,
    };
    let body = intent_json(&id, &intent);
    s.intents.insert(id, intent);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn confirm_intent(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut s = lock(&state);
    let decline = s.decline.clone();
    let Some(intent) = s.intents.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, json!({"detail": "Not found."}));
    };
    match decline {
        Some(reason) => {
            intent.status = "failed";
            intent.decline_reason = Some(reason);
        }
        None => intent.status = "succeeded",
    }
    let body = intent_json(&id, intent);
    Json(body).into_response()
}
