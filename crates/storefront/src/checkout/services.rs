//! Order and payment-intent services used by checkout.
//!
//! Each service is a trait with a REST implementation against the store API
//! and an in-memory implementation for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketstall_core::{
    CartToken, CurrencyCode, Email, GuestCheckoutInfo, OrderId, OrderStatus, PaymentStatus, Price,
    ProductId, UserId,
};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::ApiClient;
use crate::config::StorefrontConfig;
use crate::error::ServiceError;
use crate::gateway::OperationToken;

// =============================================================================
// Domain types
// =============================================================================

/// One ordered line, priced as the cart last confirmed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Price,
}

/// Who places the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCustomer {
    Account { user_id: UserId },
    Guest(GuestCheckoutInfo),
}

/// Everything the order service needs to create an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub cart_id: CartToken,
    pub customer: OrderCustomer,
    pub lines: Vec<OrderLine>,
    pub total: Price,
}

/// An order as reported by the order service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total: Price,
    /// Contact email for guest orders.
    pub email: Option<Email>,
    pub placed_at: Option<DateTime<Utc>>,
}

/// A payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub order_id: OrderId,
    pub amount: Price,
    pub status: PaymentStatus,
    pub decline_reason: Option<String>,
}

/// Order creation and guest lookup.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Create an order.
    async fn create_order(
        &self,
        request: &OrderRequest,
        op: OperationToken,
    ) -> Result<OrderSummary, ServiceError>;

    /// Look up a guest order, verified by the contact email.
    async fn guest_order(&self, order_id: OrderId, email: &Email)
    -> Result<OrderSummary, ServiceError>;
}

/// Opaque payment-intent provider.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Create an intent for `amount` against an order.
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Price,
        op: OperationToken,
    ) -> Result<PaymentIntent, ServiceError>;

    /// Confirm a previously created intent.
    async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError>;
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderLine {
    product_id: ProductId,
    quantity: u32,
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderBody<'a> {
    cart_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guest: Option<&'a GuestCheckoutInfo>,
    items: Vec<WireOrderLine>,
    total: Decimal,
    currency: CurrencyCode,
}

impl<'a> From<&'a OrderRequest> for CreateOrderBody<'a> {
    fn from(request: &'a OrderRequest) -> Self {
        let (user_id, guest) = match &request.customer {
            OrderCustomer::Account { user_id } => (Some(*user_id), None),
            OrderCustomer::Guest(info) => (None, Some(info)),
        };
        Self {
            cart_id: request.cart_id.as_str(),
            user_id,
            guest,
            items: request
                .lines
                .iter()
                .map(|line| WireOrderLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price.amount,
                })
                .collect(),
            total: request.total.amount,
            currency: request.total.currency_code,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder {
    id: OrderId,
    #[serde(default)]
    status: OrderStatus,
    total: Decimal,
    #[serde(default)]
    currency: Option<CurrencyCode>,
    #[serde(default)]
    email: Option<Email>,
    #[serde(default)]
    placed_at: Option<DateTime<Utc>>,
}

impl WireOrder {
    fn into_summary(self, default_currency: CurrencyCode) -> OrderSummary {
        OrderSummary {
            order_id: self.id,
            status: self.status,
            total: Price::new(self.total, self.currency.unwrap_or(default_currency)),
            email: self.email,
            placed_at: self.placed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIntentBody {
    order_id: OrderId,
    amount: Decimal,
    currency: CurrencyCode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIntent {
    id: String,
    order_id: OrderId,
    amount: Decimal,
    #[serde(default)]
    currency: Option<CurrencyCode>,
    status: PaymentStatus,
    #[serde(default)]
    decline_reason: Option<String>,
}

impl WireIntent {
    fn into_intent(self, default_currency: CurrencyCode) -> PaymentIntent {
        PaymentIntent {
            id: self.id,
            order_id: self.order_id,
            amount: Price::new(self.amount, self.currency.unwrap_or(default_currency)),
            status: self.status,
            decline_reason: self.decline_reason,
        }
    }
}

fn to_body(value: &impl Serialize) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Protocol(e.to_string()))
}

// =============================================================================
// REST implementations
// =============================================================================

/// Order service backed by `orders/`.
#[derive(Clone)]
pub struct RestOrderService {
    api: ApiClient,
    currency: CurrencyCode,
}

impl RestOrderService {
    /// Create the service from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: &StorefrontConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            api: ApiClient::new(config).map_err(|e| ServiceError::Unavailable(e.to_string()))?,
            currency: config.currency,
        })
    }
}

#[async_trait]
impl OrderService for RestOrderService {
    #[instrument(skip(self, request), fields(cart_id = %request.cart_id, op = %op))]
    async fn create_order(
        &self,
        request: &OrderRequest,
        op: OperationToken,
    ) -> Result<OrderSummary, ServiceError> {
        let body = to_body(&CreateOrderBody::from(request))?;
        let url = self.api.endpoint("orders/", &[])?;
        let order: WireOrder = self.api.send(Method::POST, url, Some(&body), Some(op)).await?;
        Ok(order.into_summary(self.currency))
    }

    #[instrument(skip(self, email), fields(order_id = %order_id))]
    async fn guest_order(
        &self,
        order_id: OrderId,
        email: &Email,
    ) -> Result<OrderSummary, ServiceError> {
        let url = self
            .api
            .endpoint(&format!("orders/guest/{order_id}/"), &[("email", email.as_str())])?;
        let order: WireOrder = self
            .api
            .send(Method::GET, url, None, None)
            .await
            .map_err(|e| ServiceError::from_failure(e, format!("order {order_id}")))?;
        Ok(order.into_summary(self.currency))
    }
}

/// Payment-intent service backed by `payments/intents/`.
#[derive(Clone)]
pub struct RestPaymentService {
    api: ApiClient,
    currency: CurrencyCode,
}

impl RestPaymentService {
    /// Create the service from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: &StorefrontConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            api: ApiClient::new(config).map_err(|e| ServiceError::Unavailable(e.to_string()))?,
            currency: config.currency,
        })
    }
}

#[async_trait]
impl PaymentService for RestPaymentService {
    #[instrument(skip(self), fields(order_id = %order_id, amount = %amount, op = %op))]
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Price,
        op: OperationToken,
    ) -> Result<PaymentIntent, ServiceError> {
        let body = to_body(&CreateIntentBody {
            order_id,
            amount: amount.amount,
            currency: amount.currency_code,
        })?;
        let url = self.api.endpoint("payments/intents/", &[])?;
        let intent: WireIntent = self.api.send(Method::POST, url, Some(&body), Some(op)).await?;
        Ok(intent.into_intent(self.currency))
    }

    #[instrument(skip(self))]
    async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        let url = self
            .api
            .endpoint(&format!("payments/intents/{intent_id}/confirm/"), &[])?;
        let intent: WireIntent = self
            .api
            .send(Method::POST, url, Some(&serde_json::json!({})), None)
            .await
            .map_err(|e| ServiceError::from_failure(e, format!("payment intent {intent_id}")))?;
        Ok(intent.into_intent(self.currency))
    }
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: Vec<(OrderRequest, OrderSummary)>,
    by_op: HashMap<OperationToken, OrderId>,
    fail_next: Option<ServiceError>,
}

/// In-memory order service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<Mutex<InMemoryOrderState>>,
}

impl InMemoryOrderService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.state().fail_next = Some(error);
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    /// The request an order was created from.
    #[must_use]
    pub fn request_for(&self, order_id: OrderId) -> Option<OrderRequest> {
        self.state()
            .orders
            .iter()
            .find(|(_, summary)| summary.order_id == order_id)
            .map(|(request, _)| request.clone())
    }

    /// Move an order to a new status.
    pub fn set_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some((_, summary)) = self
            .state()
            .orders
            .iter_mut()
            .find(|(_, summary)| summary.order_id == order_id)
        {
            summary.status = status;
        }
    }

    fn state(&self) -> MutexGuard<'_, InMemoryOrderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn create_order(
        &self,
        request: &OrderRequest,
        op: OperationToken,
    ) -> Result<OrderSummary, ServiceError> {
        let mut state = self.state();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if let Some(existing) = state.by_op.get(&op).copied()
            && let Some((_, summary)) = state.orders.iter().find(|(_, s)| s.order_id == existing)
        {
            return Ok(summary.clone());
        }

        let next = i32::try_from(state.orders.len() + 1)
            .map_err(|_| ServiceError::Rejected("order limit reached".to_string()))?;
        let summary = OrderSummary {
            order_id: OrderId::new(next),
            status: OrderStatus::Pending,
            total: request.total,
            email: match &request.customer {
                OrderCustomer::Guest(info) => Some(info.email.clone()),
                OrderCustomer::Account { .. } => None,
            },
            placed_at: Some(Utc::now()),
        };
        state.by_op.insert(op, summary.order_id);
        state.orders.push((request.clone(), summary.clone()));
        Ok(summary)
    }

    async fn guest_order(
        &self,
        order_id: OrderId,
        email: &Email,
    ) -> Result<OrderSummary, ServiceError> {
        let mut state = self.state();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state
            .orders
            .iter()
            .map(|(_, summary)| summary)
            .find(|summary| {
                summary.order_id == order_id
                    && summary.email.as_ref().is_some_and(|stored| stored.matches(email))
            })
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    intents: HashMap<String, PaymentIntent>,
    next_id: u32,
    decline_reason: Option<String>,
    fail_next: Option<ServiceError>,
}

/// In-memory payment-intent service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline every confirmation with `reason` until cleared with `None`.
    pub fn set_decline(&self, reason: Option<&str>) {
        self.state().decline_reason = reason.map(str::to_string);
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.state().fail_next = Some(error);
    }

    /// Intents that reached `Succeeded`.
    #[must_use]
    pub fn captured(&self) -> Vec<PaymentIntent> {
        self.state()
            .intents
            .values()
            .filter(|intent| intent.status == PaymentStatus::Succeeded)
            .cloned()
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn create_intent(
        &self,
        order_id: OrderId,
        amount: Price,
        _op: OperationToken,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut state = self.state();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.next_id += 1;
        let intent = PaymentIntent {
            id: format!("pi_{:04}", state.next_id),
            order_id,
            amount,
            status: PaymentStatus::RequiresConfirmation,
            decline_reason: None,
        };
        state.intents.insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        let mut state = self.state();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        let decline = state.decline_reason.clone();
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| ServiceError::NotFound(format!("payment intent {intent_id}")))?;
        match decline {
            Some(reason) => {
                intent.status = PaymentStatus::Failed;
                intent.decline_reason = Some(reason);
            }
            None => intent.status = PaymentStatus::Succeeded,
        }
        Ok(intent.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use marketstall_core::ShippingAddress;
    use serde_json::json;

    use super::*;

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

    fn request(customer: OrderCustomer) -> OrderRequest {
        OrderRequest {
            cart_id: CartToken::new("c-1"),
            customer,
            lines: vec![OrderLine {
                product_id: ProductId::new(1),
                quantity: 2,
                unit_price: Price::from_cents(500, CurrencyCode::USD),
            }],
            total: Price::from_cents(1000, CurrencyCode::USD),
        }
    }

    #[test]
    fn test_guest_order_body_shape() {
        let order = request(OrderCustomer::Guest(guest()));
        let body = serde_json::to_value(CreateOrderBody::from(&order)).unwrap();

        assert_eq!(body["cartId"], "c-1");
        assert!(body.get("userId").is_none());
        assert_eq!(body["guest"]["email"], "ada@example.com");
        assert_eq!(body["items"][0], json!({"productId": 1, "quantity": 2, "unitPrice": "5.00"}));
        assert_eq!(body["total"], "10.00");
        assert_eq!(body["currency"], "USD");
    }

    #[test]
    fn test_wire_intent_conversion() {
        let wire: WireIntent = serde_json::from_value(json!({
            "id": "pi_1",
            "orderId": 4,
            "amount": "10.00",
            "status": "failed",
            "declineReason": "insufficient_funds"
        }))
        .unwrap();
        let intent = wire.into_intent(CurrencyCode::EUR);

        assert_eq!(intent.status, PaymentStatus::Failed);
        assert_eq!(intent.amount, Price::from_cents(1000, CurrencyCode::EUR));
        assert_eq!(intent.decline_reason.as_deref(), Some("insufficient_funds"));
    }

    #[tokio::test]
    async fn test_in_memory_order_is_idempotent_per_token() {
        let service = InMemoryOrderService::new();
        let op = OperationToken::new();
        let order = request(OrderCustomer::Guest(guest()));

        let first = service.create_order(&order, op).await.unwrap();
        let second = service.create_order(&order, op).await.unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(service.order_count(), 1);
    }

    #[tokio::test]
    async fn test_guest_lookup_requires_matching_email() {
        let service = InMemoryOrderService::new();
        let order = service
            .create_order(&request(OrderCustomer::Guest(guest())), OperationToken::new())
            .await
            .unwrap();

        let found = service
            .guest_order(order.order_id, &Email::parse("ADA@Example.com").unwrap())
            .await;
        assert_eq!(found.unwrap().status, OrderStatus::Pending);

        service.set_status(order.order_id, OrderStatus::Shipped);
        let shipped = service
            .guest_order(order.order_id, &Email::parse("ada@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);

        let wrong = service
            .guest_order(order.order_id, &Email::parse("eve@example.com").unwrap())
            .await;
        assert!(matches!(wrong, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_declined_confirmation() {
        let service = InMemoryPaymentService::new();
        service.set_decline(Some("card_declined"));
        let intent = service
            .create_intent(
                OrderId::new(1),
                Price::from_cents(100, CurrencyCode::USD),
                OperationToken::new(),
            )
            .await
            .unwrap();

        let confirmed = service.confirm_intent(&intent.id).await.unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Failed);
        assert!(service.captured().is_empty());
    }
}
