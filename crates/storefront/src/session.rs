//! One shopper session: the cart engine plus the services it talks to.
//!
//! A session owns its synchronizer and is passed by reference to whatever
//! renders the cart. Nothing here is global.

use std::sync::Arc;

use marketstall_core::{Cart, CartItem, CurrencyCode, Price, PriceError, ProductId};
use thiserror::Error;
use tracing::info;

use crate::cart::{CartStore, CartSynchronizer, MutationHandle};
use crate::catalog::{ProductCatalog, RestCatalog};
use crate::checkout::{CheckoutCoordinator, RestOrderService, RestPaymentService};
use crate::config::StorefrontConfig;
use crate::error::{CartError, ServiceError};
use crate::gateway::{GatewayError, RestCartGateway};
use crate::identity::FileIdentityStore;

/// Errors starting a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to build cart gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Failed to build store client: {0}")]
    Service(#[from] ServiceError),

    #[error("Failed to initialize cart: {0}")]
    Cart(#[from] CartError),
}

/// Collaborators for a session, for callers that bring their own.
pub struct SessionParts {
    pub cart: CartSynchronizer,
    pub catalog: Arc<dyn ProductCatalog>,
    pub checkout: CheckoutCoordinator,
}

/// A running storefront session.
pub struct StorefrontSession {
    cart: CartSynchronizer,
    catalog: Arc<dyn ProductCatalog>,
    checkout: CheckoutCoordinator,
}

impl StorefrontSession {
    /// Build the REST-backed stack and resolve the anonymous cart.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or no cart could be
    /// fetched or created.
    pub async fn start(config: &StorefrontConfig) -> Result<Self, SessionError> {
        let gateway = RestCartGateway::new(config)?;
        let catalog = RestCatalog::new(config)?;
        let orders = RestOrderService::new(config)?;
        let payments = RestPaymentService::new(config)?;
        let identities = FileIdentityStore::new(&config.identity_file);

        let cart = CartSynchronizer::start(
            Arc::new(gateway),
            Arc::new(identities),
            config.call_budget(),
        )
        .await?;
        let checkout = CheckoutCoordinator::new(
            cart.clone(),
            Arc::new(orders),
            Arc::new(payments),
            config.currency,
        );

        info!(api_url = %config.api_url, "Storefront session started");
        Ok(Self::from_parts(SessionParts {
            cart,
            catalog: Arc::new(catalog),
            checkout,
        }))
    }

    #[must_use]
    pub fn from_parts(parts: SessionParts) -> Self {
        Self {
            cart: parts.cart,
            catalog: parts.catalog,
            checkout: parts.checkout,
        }
    }

    #[must_use]
    pub const fn cart(&self) -> &CartSynchronizer {
        &self.cart
    }

    /// Read-only view of the cart for rendering.
    #[must_use]
    pub fn store(&self) -> &Arc<CartStore> {
        self.cart.store()
    }

    #[must_use]
    pub fn catalog(&self) -> &dyn ProductCatalog {
        self.catalog.as_ref()
    }

    #[must_use]
    pub const fn checkout(&self) -> &CheckoutCoordinator {
        &self.checkout
    }

    /// Look a product up and add it to the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the product cannot be loaded or the add fails.
    pub async fn add_product(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Vec<CartItem>, AddProductError> {
        let product = self.catalog.get_product(product_id).await?;
        let result = self.cart.add_item(&product, quantity).await;
        if let Err(CartError::OutOfStock { .. }) = &result {
            self.catalog.invalidate(product_id).await;
        }
        Ok(result?)
    }

    /// Queue an add without waiting for the cart-of-record.
    ///
    /// # Errors
    ///
    /// Returns an error if the product cannot be loaded.
    pub async fn queue_add(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<MutationHandle, ServiceError> {
        let product = self.catalog.get_product(product_id).await?;
        Ok(self.cart.add_item(&product, quantity))
    }

    /// Subtotal of the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the lines mix currencies.
    pub fn subtotal(&self, currency: CurrencyCode) -> Result<Price, PriceError> {
        self.snapshot().subtotal(currency)
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Cart> {
        self.cart.store().snapshot()
    }

    /// Finish queued work and stop the cart worker.
    pub async fn shutdown(self) {
        self.cart.shutdown().await;
        info!("Storefront session closed");
    }
}

/// Errors from [`StorefrontSession::add_product`].
#[derive(Debug, Error)]
pub enum AddProductError {
    #[error(transparent)]
    Catalog(#[from] ServiceError),

    #[error(transparent)]
    Cart(#[from] CartError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use marketstall_core::VendorId;

    use super::*;
    use crate::catalog::Product;
    use crate::checkout::{InMemoryOrderService, InMemoryPaymentService};
    use crate::gateway::InMemoryCartService;
    use crate::identity::MemoryIdentityStore;

    fn product(id: i32, stock: u32) -> Product {
        Product {
            id: ProductId::new(id),
            title: format!("Product {id}"),
            price: Price::from_cents(300, CurrencyCode::USD),
            image: None,
            stock,
            vendor_id: Some(VendorId::new(2)),
        }
    }

    async fn session(service: &InMemoryCartService) -> StorefrontSession {
        let cart = CartSynchronizer::start(
            Arc::new(service.clone()),
            Arc::new(MemoryIdentityStore::new()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let checkout = CheckoutCoordinator::new(
            cart.clone(),
            Arc::new(InMemoryOrderService::new()),
            Arc::new(InMemoryPaymentService::new()),
            CurrencyCode::USD,
        );
        StorefrontSession::from_parts(SessionParts {
            cart,
            catalog: Arc::new(service.clone()),
            checkout,
        })
    }

    #[tokio::test]
    async fn test_add_product_uses_catalog() {
        let service = InMemoryCartService::with_products([product(1, 5)]);
        let session = session(&service).await;

        let items = session.add_product(ProductId::new(1), 2).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(
            session.subtotal(CurrencyCode::USD).unwrap(),
            Price::from_cents(600, CurrencyCode::USD)
        );
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_unknown_product() {
        let service = InMemoryCartService::new();
        let session = session(&service).await;

        let result = session.add_product(ProductId::new(99), 1).await;

        assert!(matches!(
            result,
            Err(AddProductError::Catalog(ServiceError::NotFound(_)))
        ));
        assert!(session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_queue_add_is_visible_before_confirmation() {
        let service = InMemoryCartService::with_products([product(1, 5)]);
        let session = session(&service).await;
        service.pause();

        let handle = session.queue_add(ProductId::new(1), 1).await.unwrap();
        assert_eq!(session.snapshot().quantity_of(ProductId::new(1)), 1);

        service.resume();
        handle.await.unwrap();
        assert_eq!(session.store().version(), session.snapshot().version);
    }
}
