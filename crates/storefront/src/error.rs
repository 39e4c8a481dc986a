//! Error types surfaced to storefront consumers, with Sentry integration.
//!
//! Gateway failures are translated into [`CartError`] at the synchronizer
//! boundary and into [`CheckoutError`] by the checkout coordinator. Failures
//! caused by the remote side are captured to Sentry there; user input errors
//! are not.

use marketstall_core::{CartToken, PriceError, ProductId};
use reqwest::StatusCode;
use thiserror::Error;

use crate::api::ApiFailure;
use crate::gateway::GatewayError;

/// Errors from the catalog, order and payment services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The service could not be reached or is overloaded.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The response could not be decoded.
    #[error("Unexpected response: {0}")]
    Protocol(String),
}

impl ServiceError {
    /// Map a request failure, naming `what` when the server reports 404.
    #[must_use]
    pub fn from_failure(failure: ApiFailure, what: impl Into<String>) -> Self {
        match failure {
            ApiFailure::Status { status, .. } if status == StatusCode::NOT_FOUND => {
                Self::NotFound(what.into())
            }
            other => other.into(),
        }
    }
}

impl From<ApiFailure> for ServiceError {
    fn from(failure: ApiFailure) -> Self {
        if failure.is_unavailable() {
            return Self::Unavailable(failure.message());
        }
        match failure {
            ApiFailure::Status { .. } => Self::Rejected(failure.message()),
            ApiFailure::Decode(msg) | ApiFailure::InvalidPath(msg) => Self::Protocol(msg),
            ApiFailure::Transport(msg) => Self::Unavailable(msg),
        }
    }
}

/// Errors returned by cart operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// The cart service could not be reached; local state was rolled back.
    #[error("Cart service unreachable: {0}")]
    Unreachable(String),

    /// Not enough stock for the requested quantity.
    #[error("Only {available} of product {product_id} available (requested {requested})")]
    OutOfStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The cart token is no longer known to the server.
    #[error("Cart {0} is no longer valid")]
    InvalidIdentity(CartToken),

    /// Quantity rejected before any request was made.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The product has no line in the cart.
    #[error("Product {product_id} is not in the cart")]
    NotInCart { product_id: ProductId },

    /// The guest cart could not be merged into the user cart.
    #[error("Could not merge guest cart: {0}")]
    MergeFailed(#[source] GatewayError),

    /// The server refused the change.
    #[error("Cart change rejected: {0}")]
    Rejected(String),

    /// The server answered with something unexpected.
    #[error("Unexpected cart response: {0}")]
    Protocol(String),

    /// The session was shut down before the operation ran.
    #[error("Cart session closed")]
    SessionClosed,
}

impl CartError {
    /// Translate a gateway error for an operation that asked for `requested` units.
    #[must_use]
    pub fn from_gateway(err: GatewayError, requested: u32) -> Self {
        match err {
            GatewayError::Unreachable(msg) => Self::Unreachable(msg),
            GatewayError::OutOfStock {
                product_id,
                available,
            } => Self::OutOfStock {
                product_id,
                requested,
                available,
            },
            GatewayError::InvalidIdentity(token) => Self::InvalidIdentity(token),
            GatewayError::Rejected(msg) => Self::Rejected(msg),
            GatewayError::Protocol(msg) => Self::Protocol(msg),
        }
    }

    /// Whether repeating the same action later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::SessionClosed)
            || matches!(self, Self::MergeFailed(GatewayError::Unreachable(_)))
    }

    /// Whether the failure originates on the remote side and should be reported.
    #[must_use]
    pub const fn is_server_side(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Protocol(_))
            || matches!(
                self,
                Self::MergeFailed(GatewayError::Unreachable(_) | GatewayError::Protocol(_))
            )
    }

    /// Short text suitable for showing to a shopper.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreachable(_) | Self::Protocol(_) => {
                "We couldn't reach the store. Your cart was not changed.".to_string()
            }
            Self::OutOfStock { available: 0, .. } => "This item is out of stock.".to_string(),
            Self::OutOfStock { available, .. } => {
                format!("Only {available} left in stock.")
            }
            Self::InvalidIdentity(_) => "Your cart expired. Please try again.".to_string(),
            Self::InvalidQuantity { .. } => "Please choose a quantity of at least 1.".to_string(),
            Self::NotInCart { .. } => "That item is no longer in your cart.".to_string(),
            Self::MergeFailed(_) => {
                "We couldn't combine your carts. Your guest cart was kept.".to_string()
            }
            Self::Rejected(msg) => msg.clone(),
            Self::SessionClosed => "The store session has ended.".to_string(),
        }
    }
}

/// Errors returned by checkout and order tracking.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// An anonymous cart needs contact and shipping data.
    #[error("Guest checkout requires contact and shipping information")]
    MissingGuestInfo,

    /// A required guest field is blank.
    #[error("Guest checkout field '{0}' is required")]
    InvalidGuestInfo(&'static str),

    /// Nothing to order.
    #[error("Cart is empty")]
    EmptyCart,

    /// The payment provider declined the intent.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The cart could not be settled or reset.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// The order or payment service failed.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// The total could not be computed.
    #[error("Price error: {0}")]
    Price(#[from] PriceError),
}

impl CheckoutError {
    /// Whether the failure originates on the remote side and should be reported.
    #[must_use]
    pub const fn is_server_side(&self) -> bool {
        match self {
            Self::Cart(err) => err.is_server_side(),
            Self::Service(ServiceError::Unavailable(_) | ServiceError::Protocol(_)) => true,
            _ => false,
        }
    }
}

/// Report an error to Sentry and log it with the event id.
pub fn capture(err: &(dyn std::error::Error + 'static), context: &str) {
    let event_id = sentry::capture_error(err);
    tracing::error!(
        error = %err,
        sentry_event_id = %event_id,
        context,
        "Storefront operation failed"
    );
}

/// Set the Sentry user context from a user ID.
///
/// Call this after a successful login so errors are associated with the user.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a shopper action.
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added item", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_error_from_gateway() {
        let err = CartError::from_gateway(
            GatewayError::OutOfStock {
                product_id: ProductId::new(2),
                available: 1,
            },
            3,
        );
        assert_eq!(
            err,
            CartError::OutOfStock {
                product_id: ProductId::new(2),
                requested: 3,
                available: 1
            }
        );
        assert_eq!(err.user_message(), "Only 1 left in stock.");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_and_server_side() {
        let err = CartError::Unreachable("timeout".to_string());
        assert!(err.is_retryable());
        assert!(err.is_server_side());

        let err = CartError::MergeFailed(GatewayError::Rejected("no".to_string()));
        assert!(!err.is_retryable());
        assert!(!err.is_server_side());

        let err = CheckoutError::Service(ServiceError::Unavailable("down".to_string()));
        assert!(err.is_server_side());
        assert!(!CheckoutError::MissingGuestInfo.is_server_side());
    }

    #[test]
    fn test_missing_line_has_its_own_message() {
        let missing = CartError::NotInCart {
            product_id: ProductId::new(4),
        };
        let zero = CartError::InvalidQuantity {
            product_id: ProductId::new(4),
            quantity: 0,
        };
        assert_ne!(missing.user_message(), zero.user_message());
        assert_eq!(missing.to_string(), "Product 4 is not in the cart");
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_service_error_from_failure() {
        let failure = ApiFailure::Status {
            status: StatusCode::NOT_FOUND,
            body: crate::api::ErrorBody::default(),
        };
        assert_eq!(
            ServiceError::from_failure(failure, "order 7"),
            ServiceError::NotFound("order 7".to_string())
        );

        let failure = ApiFailure::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: crate::api::ErrorBody::default(),
        };
        assert!(matches!(
            ServiceError::from(failure),
            ServiceError::Unavailable(_)
        ));
    }

    #[test]
    fn test_checkout_error_display() {
        assert_eq!(
            CheckoutError::InvalidGuestInfo("phone").to_string(),
            "Guest checkout field 'phone' is required"
        );
        assert_eq!(CheckoutError::EmptyCart.to_string(), "Cart is empty");
    }
}
