//! Checkout and guest order tracking.

use clap::Args;
use marketstall_core::{Email, GuestCheckoutInfo, OrderId, ShippingAddress};
use marketstall_storefront::StorefrontSession;
use marketstall_storefront::checkout::{OrderService, RestOrderService};
use marketstall_storefront::config::StorefrontConfig;

use super::{CliError, print_order};

/// Contact and shipping details for a guest checkout.
///
/// Ignored when signed in. Leaving out `--email` checks out without guest
/// details, which an anonymous cart refuses.
#[derive(Debug, Args)]
pub struct GuestArgs {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    email: Option<Email>,

    #[arg(long)]
    phone: Option<String>,

    #[arg(long)]
    line1: Option<String>,

    #[arg(long)]
    line2: Option<String>,

    #[arg(long)]
    city: Option<String>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    postal_code: Option<String>,

    /// ISO 3166-1 alpha-2 country code
    #[arg(long)]
    country: Option<String>,
}

impl GuestArgs {
    /// Missing free-text fields become blank and are reported by checkout.
    fn into_guest_info(self) -> Option<GuestCheckoutInfo> {
        let email = self.email?;
        Some(GuestCheckoutInfo {
            name: self.name.unwrap_or_default(),
            email,
            phone: self.phone.unwrap_or_default(),
            shipping_address: ShippingAddress {
                line1: self.line1.unwrap_or_default(),
                line2: self.line2,
                city: self.city.unwrap_or_default(),
                region: self.region,
                postal_code: self.postal_code.unwrap_or_default(),
                country: self.country.unwrap_or_default(),
            },
        })
    }
}

/// Check out the session's cart.
#[allow(clippy::print_stdout)]
pub async fn checkout(session: &StorefrontSession, guest: GuestArgs) -> Result<(), CliError> {
    let receipt = session
        .checkout()
        .checkout(guest.into_guest_info())
        .await?;

    println!("Order #{} placed, total {}", receipt.order_id, receipt.total);
    if let Some(tracking) = receipt.tracking {
        println!(
            "Track it with: ms-cli track {} --email {}",
            tracking.order_id, tracking.email
        );
    }
    Ok(())
}

/// Look up a guest order by id and email.
pub async fn track(
    config: &StorefrontConfig,
    order_id: OrderId,
    email: &Email,
) -> Result<(), CliError> {
    let orders = RestOrderService::new(config)?;
    let order = orders.guest_order(order_id, email).await?;
    print_order(&order);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args() -> GuestArgs {
        GuestArgs {
            name: Some("Ada Buyer".to_string()),
            email: Some(Email::parse("ada@example.com").unwrap()),
            phone: Some("555-0100".to_string()),
            line1: Some("1 Market St".to_string()),
            line2: None,
            city: Some("Springfield".to_string()),
            region: None,
            postal_code: Some("12345".to_string()),
            country: Some("US".to_string()),
        }
    }

    #[test]
    fn test_complete_guest_args() {
        let info = args().into_guest_info().unwrap();
        assert_eq!(info.first_blank_field(), None);
    }

    #[test]
    fn test_missing_email_means_no_guest_info() {
        let mut args = args();
        args.email = None;
        assert!(args.into_guest_info().is_none());
    }

    #[test]
    fn test_missing_field_is_left_blank() {
        let mut args = args();
        args.city = None;
        let info = args.into_guest_info().unwrap();
        assert_eq!(info.first_blank_field(), Some("shipping_address.city"));
    }
}
