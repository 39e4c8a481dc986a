//! Command implementations and shared output helpers.

use marketstall_core::{Cart, CartToken, UserId};
use marketstall_storefront::checkout::OrderSummary;
use marketstall_storefront::config::StorefrontConfig;
use marketstall_storefront::error::ServiceError;
use marketstall_storefront::session::{AddProductError, SessionError};
use marketstall_storefront::{
    AuthenticatedUser, CartError, CartNotice, CheckoutError, StorefrontSession,
};
use thiserror::Error;

pub mod auth;
pub mod cart;
pub mod checkout;
pub mod products;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Could not start session: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    AddProduct(#[from] AddProductError),
}

/// Start a session, signing in first if a user was given.
pub async fn open_session(
    config: &StorefrontConfig,
    user: Option<(UserId, String)>,
) -> Result<StorefrontSession, CliError> {
    let session = StorefrontSession::start(config).await?;
    if let Some((user_id, cart_id)) = user {
        let signed_in = session
            .cart()
            .login(AuthenticatedUser {
                user_id,
                cart_id: CartToken::new(cart_id),
                email: None,
            })
            .await;
        if let Err(e) = signed_in {
            session.shutdown().await;
            return Err(e.into());
        }
    }
    Ok(session)
}

/// Print the cart and any pending notices.
#[allow(clippy::print_stdout)]
pub fn print_cart(session: &StorefrontSession, config: &StorefrontConfig) {
    print_notices(&session.cart().drain_notices());

    let cart = session.snapshot();
    print_cart_lines(&cart);
    match cart.subtotal(config.currency) {
        Ok(subtotal) => println!("Subtotal: {subtotal}"),
        Err(e) => println!("Subtotal unavailable: {e}"),
    }
}

#[allow(clippy::print_stdout)]
fn print_cart_lines(cart: &Cart) {
    let owner = cart
        .identity
        .user_id()
        .map_or_else(|| "guest".to_string(), |id| format!("user {id}"));
    println!("Cart {} ({owner}, version {})", cart.identity.cart_id, cart.version);

    if cart.is_empty() {
        println!("  (empty)");
        return;
    }
    for item in &cart.items {
        let line_total = item
            .line_total()
            .map_or_else(|_| "-".to_string(), |price| price.to_string());
        println!(
            "  {:>3} x {:<32} #{:<6} {:>10} {:>10}",
            item.quantity, item.product.title, item.product_id, item.unit_price, line_total
        );
    }
}

#[allow(clippy::print_stdout)]
fn print_notices(notices: &[CartNotice]) {
    for notice in notices {
        match notice {
            CartNotice::QuantityAdjusted {
                product_id,
                requested,
                granted,
            } => println!(
                "Note: only {granted} of {requested} units of product {product_id} were available"
            ),
            CartNotice::CartReset {
                previous,
                lost_items,
            } => println!(
                "Note: cart {previous} expired; {lost_items} line(s) could not be carried over"
            ),
        }
    }
}

#[allow(clippy::print_stdout)]
pub fn print_order(order: &OrderSummary) {
    println!("Order #{} - {}", order.order_id, order.status);
    println!("  Total: {}", order.total);
    if let Some(placed_at) = order.placed_at {
        println!("  Placed: {}", placed_at.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Print a failure in shopper-facing terms.
#[allow(clippy::print_stderr)]
pub fn print_error(error: &CliError) {
    let message = match error {
        CliError::Cart(e) | CliError::AddProduct(AddProductError::Cart(e)) => e.user_message(),
        CliError::Checkout(CheckoutError::Cart(e)) => e.user_message(),
        other => other.to_string(),
    };
    eprintln!("Error: {message}");
}
