//! Checkout: settle the cart, place the order, pay, start a fresh cart.
//!
//! The coordinator reads the cart only through the synchronizer. Validation
//! failures and declined payments leave the cart untouched; once payment
//! succeeds the cart is reset and a receipt is returned even if the reset
//! itself fails.

mod services;

use std::sync::Arc;

use marketstall_core::{
    CartItem, CurrencyCode, Email, GuestCheckoutInfo, IdentityKind, OrderId, PaymentStatus, Price,
};
use tracing::{info, instrument, warn};

pub use services::{
    InMemoryOrderService, InMemoryPaymentService, OrderCustomer, OrderLine, OrderRequest,
    OrderService, OrderSummary, PaymentIntent, PaymentService, RestOrderService,
    RestPaymentService,
};

use crate::cart::CartSynchronizer;
use crate::error::{self, CheckoutError, ServiceError};
use crate::gateway::OperationToken;

/// What a guest needs to look an order up later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestOrderLookup {
    pub order_id: OrderId,
    pub email: Email,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub total: Price,
    /// Present for guest orders only.
    pub tracking: Option<GuestOrderLookup>,
}

/// Drives checkout against the order and payment services.
#[derive(Clone)]
pub struct CheckoutCoordinator {
    inner: Arc<CheckoutInner>,
}

struct CheckoutInner {
    cart: CartSynchronizer,
    orders: Arc<dyn OrderService>,
    payments: Arc<dyn PaymentService>,
    currency: CurrencyCode,
}

impl CheckoutCoordinator {
    #[must_use]
    pub fn new(
        cart: CartSynchronizer,
        orders: Arc<dyn OrderService>,
        payments: Arc<dyn PaymentService>,
        currency: CurrencyCode,
    ) -> Self {
        Self {
            inner: Arc::new(CheckoutInner {
                cart,
                orders,
                payments,
                currency,
            }),
        }
    }

    /// Check out the current cart.
    ///
    /// Anonymous carts need `guest`; it is ignored for authenticated carts.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart is empty, guest data is missing or
    /// incomplete, payment is declined, or a remote call fails. The cart is
    /// unchanged in every error case.
    #[instrument(skip(self, guest), fields(guest = guest.is_some()))]
    pub async fn checkout(
        &self,
        guest: Option<GuestCheckoutInfo>,
    ) -> Result<OrderReceipt, CheckoutError> {
        let result = self.place_order(guest).await;
        if let Err(e) = &result
            && e.is_server_side()
        {
            error::capture(e, "checkout");
        }
        result
    }

    async fn place_order(
        &self,
        guest: Option<GuestCheckoutInfo>,
    ) -> Result<OrderReceipt, CheckoutError> {
        let inner = &self.inner;
        let cart = inner.cart.settle().await?;

        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let customer = match cart.identity.kind {
            IdentityKind::Authenticated { user_id } => OrderCustomer::Account { user_id },
            IdentityKind::Anonymous => {
                let info = guest.ok_or(CheckoutError::MissingGuestInfo)?;
                if let Some(field) = info.first_blank_field() {
                    return Err(CheckoutError::InvalidGuestInfo(field));
                }
                OrderCustomer::Guest(info)
            }
        };

        let total = cart.subtotal(inner.currency)?;
        let request = OrderRequest {
            cart_id: cart.identity.cart_id.clone(),
            customer,
            lines: cart.items.iter().map(order_line).collect(),
            total,
        };

        error::add_breadcrumb("checkout", "Placing order", None);
        let order = inner
            .orders
            .create_order(&request, OperationToken::new())
            .await?;
        info!(order_id = %order.order_id, total = %total, "Order created");

        let intent = inner
            .payments
            .create_intent(order.order_id, total, OperationToken::new())
            .await?;
        let intent = inner.payments.confirm_intent(&intent.id).await?;
        match intent.status {
            PaymentStatus::Succeeded => {}
            PaymentStatus::Failed | PaymentStatus::RequiresAction => {
                let reason = intent.decline_reason.unwrap_or_else(|| {
                    if intent.status == PaymentStatus::RequiresAction {
                        "additional authentication required".to_string()
                    } else {
                        "declined".to_string()
                    }
                });
                warn!(order_id = %order.order_id, %reason, "Payment declined");
                return Err(CheckoutError::PaymentDeclined(reason));
            }
            PaymentStatus::RequiresConfirmation => {
                return Err(ServiceError::Protocol(format!(
                    "payment intent {} was not confirmed",
                    intent.id
                ))
                .into());
            }
        }
        info!(order_id = %order.order_id, intent_id = %intent.id, "Payment captured");

        if let Err(e) = inner.cart.reset_after_order().await {
            warn!(order_id = %order.order_id, error = %e, "Cart reset after order failed");
        }

        let tracking = match request.customer {
            OrderCustomer::Guest(info) => Some(GuestOrderLookup {
                order_id: order.order_id,
                email: info.email,
            }),
            OrderCustomer::Account { .. } => None,
        };

        Ok(OrderReceipt {
            order_id: order.order_id,
            total,
            tracking,
        })
    }

    /// Look up a guest order without authentication.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if no order matches both the id and
    /// the email.
    #[instrument(skip(self, email), fields(order_id = %order_id))]
    pub async fn track_guest_order(
        &self,
        order_id: OrderId,
        email: &Email,
    ) -> Result<OrderSummary, CheckoutError> {
        let result = self.inner.orders.guest_order(order_id, email).await;
        result.map_err(|e| {
            let err = CheckoutError::from(e);
            if err.is_server_side() {
                error::capture(&err, "track_guest_order");
            }
            err
        })
    }
}

fn order_line(item: &CartItem) -> OrderLine {
    OrderLine {
        product_id: item.product_id,
        quantity: item.quantity,
        unit_price: item.unit_price,
    }
}
