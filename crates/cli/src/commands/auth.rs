//! Sign-in and sign-out.

use marketstall_core::{CartToken, UserId};
use marketstall_storefront::config::StorefrontConfig;
use marketstall_storefront::{AuthenticatedUser, StorefrontSession};

use super::{CliError, print_cart};

/// Sign in, merging a non-empty guest cart into the user's cart.
pub async fn login(
    session: &StorefrontSession,
    config: &StorefrontConfig,
    user_id: UserId,
    cart_id: String,
    email: Option<String>,
) -> Result<(), CliError> {
    session
        .cart()
        .login(AuthenticatedUser {
            user_id,
            cart_id: CartToken::new(cart_id),
            email,
        })
        .await?;
    tracing::info!(%user_id, "Signed in");
    print_cart(session, config);
    Ok(())
}

/// Sign out. The session continues with the device's anonymous cart.
pub async fn logout(
    session: &StorefrontSession,
    config: &StorefrontConfig,
) -> Result<(), CliError> {
    session.cart().logout().await?;
    tracing::info!("Signed out");
    print_cart(session, config);
    Ok(())
}
