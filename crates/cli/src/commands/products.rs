//! Catalog listing.

use marketstall_core::VendorId;
use marketstall_storefront::catalog::{ProductCatalog, RestCatalog};
use marketstall_storefront::config::StorefrontConfig;

use super::CliError;

/// List products, optionally for one vendor.
#[allow(clippy::print_stdout)]
pub async fn list(config: &StorefrontConfig, vendor: Option<VendorId>) -> Result<(), CliError> {
    let catalog = RestCatalog::new(config)?;
    let products = catalog.list_products(vendor).await?;

    if products.is_empty() {
        println!("No products found.");
        return Ok(());
    }
    for product in &products {
        let stock = if product.stock == 0 {
            "sold out".to_string()
        } else {
            format!("{} in stock", product.stock)
        };
        println!(
            "#{:<6} {:<40} {:>10}  {stock}",
            product.id, product.title, product.price
        );
    }
    Ok(())
}
