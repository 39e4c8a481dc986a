//! Read-only product catalog client.
//!
//! Single products are cached using `moka` with a configurable TTL; product
//! lists are always fetched fresh so stock levels stay current.

use std::sync::Arc;

use async_trait::async_trait;
use marketstall_core::{CurrencyCode, Price, ProductId, ProductSnapshot, VendorId};
use moka::future::Cache;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::ApiClient;
use crate::config::StorefrontConfig;
use crate::error::ServiceError;

/// Follow at most this many `next` links when listing.
const MAX_PAGES: usize = 50;

/// A product as offered by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub price: Price,
    pub image: Option<String>,
    /// Units available right now.
    pub stock: u32,
    pub vendor_id: Option<VendorId>,
}

impl Product {
    /// Display details stored on a cart line.
    #[must_use]
    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            id: self.id,
            title: self.title.clone(),
            image: self.image.clone(),
        }
    }
}

/// Product lookups.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch one product.
    async fn get_product(&self, id: ProductId) -> Result<Product, ServiceError>;

    /// List products, optionally restricted to one vendor.
    async fn list_products(&self, vendor: Option<VendorId>) -> Result<Vec<Product>, ServiceError>;

    /// Forget anything cached about a product after the server reported a stock change.
    async fn invalidate(&self, _id: ProductId) {}
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
struct WireImage {
    image: String,
}

#[derive(Debug, Deserialize)]
struct WireCatalogProduct {
    id: ProductId,
    title: String,
    unit_price: Decimal,
    #[serde(default)]
    inventory: u32,
    #[serde(default)]
    images: Vec<WireImage>,
    #[serde(default)]
    vendor: Option<VendorId>,
}

impl WireCatalogProduct {
    fn into_product(self, currency: CurrencyCode) -> Product {
        Product {
            id: self.id,
            title: self.title,
            price: Price::new(self.unit_price, currency),
            image: self.images.into_iter().next().map(|img| img.image),
            stock: self.inventory,
            vendor_id: self.vendor,
        }
    }
}

/// `products/` is paginated; vendor listings are plain arrays.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProductPage {
    Paged {
        results: Vec<WireCatalogProduct>,
        #[serde(default)]
        next: Option<String>,
    },
    Plain(Vec<WireCatalogProduct>),
}

// =============================================================================
// RestCatalog
// =============================================================================

/// Catalog client for the store's product endpoints.
#[derive(Clone)]
pub struct RestCatalog {
    inner: Arc<RestCatalogInner>,
}

struct RestCatalogInner {
    api: ApiClient,
    currency: CurrencyCode,
    cache: Cache<ProductId, Product>,
}

impl RestCatalog {
    /// Create a catalog client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: &StorefrontConfig) -> Result<Self, ServiceError> {
        let api = ApiClient::new(config).map_err(|e| ServiceError::Unavailable(e.to_string()))?;
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(config.catalog_ttl)
            .build();

        Ok(Self {
            inner: Arc::new(RestCatalogInner {
                api,
                currency: config.currency,
                cache,
            }),
        })
    }
}

#[async_trait]
impl ProductCatalog for RestCatalog {
    #[instrument(skip(self), fields(product_id = %id))]
    async fn get_product(&self, id: ProductId) -> Result<Product, ServiceError> {
        if let Some(product) = self.inner.cache.get(&id).await {
            debug!("Cache hit for product");
            return Ok(product);
        }

        let url = self.inner.api.endpoint(&format!("products/{id}/"), &[])?;
        let wire: WireCatalogProduct = self
            .inner
            .api
            .send_with_retry(Method::GET, url, None, None)
            .await
            .map_err(|e| ServiceError::from_failure(e, format!("product {id}")))?;
        let product = wire.into_product(self.inner.currency);

        self.inner.cache.insert(id, product.clone()).await;

        Ok(product)
    }

    #[instrument(skip(self))]
    async fn list_products(&self, vendor: Option<VendorId>) -> Result<Vec<Product>, ServiceError> {
        let path = vendor.map_or_else(
            || "products/".to_string(),
            |vendor| format!("vendors/{vendor}/products/"),
        );
        let mut url = self.inner.api.endpoint(&path, &[])?;
        let mut products = Vec::new();

        for _ in 0..MAX_PAGES {
            let page: ProductPage = self
                .inner
                .api
                .send_with_retry(Method::GET, url.clone(), None, None)
                .await
                .map_err(|e| ServiceError::from_failure(e, path.clone()))?;

            let next = match page {
                ProductPage::Paged { results, next } => {
                    products.extend(results);
                    next
                }
                ProductPage::Plain(results) => {
                    products.extend(results);
                    None
                }
            };

            match next {
                Some(next) => {
                    url = url
                        .join(&next)
                        .map_err(|e| ServiceError::Protocol(format!("bad next link: {e}")))?;
                }
                None => break,
            }
        }

        debug!(count = products.len(), "Listed products");
        Ok(products
            .into_iter()
            .map(|wire| wire.into_product(self.inner.currency))
            .collect())
    }

    async fn invalidate(&self, id: ProductId) {
        self.inner.cache.invalidate(&id).await;
    }
}
