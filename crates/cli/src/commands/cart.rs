//! Cart commands.
//!
//! Each command waits for the cart-of-record to answer before printing, so
//! what is shown is the reconciled cart.

use marketstall_core::ProductId;
use marketstall_storefront::StorefrontSession;
use marketstall_storefront::config::StorefrontConfig;

use super::{CliError, print_cart};

pub fn show(session: &StorefrontSession, config: &StorefrontConfig) {
    print_cart(session, config);
}

pub async fn add(
    session: &StorefrontSession,
    config: &StorefrontConfig,
    product_id: ProductId,
    quantity: u32,
) -> Result<(), CliError> {
    session.add_product(product_id, quantity).await?;
    tracing::info!(%product_id, quantity, "Added to cart");
    print_cart(session, config);
    Ok(())
}

pub async fn remove(
    session: &StorefrontSession,
    config: &StorefrontConfig,
    product_id: ProductId,
) -> Result<(), CliError> {
    session.cart().remove_item(product_id).await?;
    print_cart(session, config);
    Ok(())
}

pub async fn update(
    session: &StorefrontSession,
    config: &StorefrontConfig,
    product_id: ProductId,
    quantity: u32,
) -> Result<(), CliError> {
    session.cart().update_quantity(product_id, quantity).await?;
    print_cart(session, config);
    Ok(())
}
