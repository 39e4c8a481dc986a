//! In-process cart-of-record.
//!
//! Behaves like the store API: stock limits, idempotent operation tokens,
//! lazily created user carts and stock-capped merges. Tests drive it through
//! failure injection and a pause gate that holds calls in flight.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use marketstall_core::{CartIdentity, CartItem, CartToken, ProductId, UserId, VendorId};
use tokio::sync::watch;
use uuid::Uuid;

use super::{CartGateway, GatewayError, OperationToken, RemoteCart};
use crate::catalog::{Product, ProductCatalog};
use crate::error::ServiceError;

#[derive(Debug, Default)]
struct MemoryCart {
    owner: Option<UserId>,
    items: Vec<CartItem>,
}

#[derive(Default)]
struct MemoryState {
    products: BTreeMap<ProductId, Product>,
    carts: HashMap<CartToken, MemoryCart>,
    replays: HashMap<OperationToken, Result<Vec<CartItem>, GatewayError>>,
    failures: VecDeque<GatewayError>,
    clamp_to_stock: bool,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    paused: watch::Sender<bool>,
    calls: AtomicUsize,
}

/// Cart-of-record and catalog held in memory.
#[derive(Clone)]
pub struct InMemoryCartService {
    inner: Arc<MemoryInner>,
}

impl Default for InMemoryCartService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCartService {
    #[must_use]
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                paused,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// A service offering `products`.
    #[must_use]
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let service = Self::new();
        for product in products {
            service.upsert_product(product);
        }
        service
    }

    /// Add or replace a product.
    pub fn upsert_product(&self, product: Product) {
        self.state().products.insert(product.id, product);
    }

    /// Change a product's stock level.
    pub fn set_stock(&self, id: ProductId, stock: u32) {
        if let Some(product) = self.state().products.get_mut(&id) {
            product.stock = stock;
        }
    }

    /// Clamp adds to the available stock instead of rejecting them.
    pub fn set_clamp_to_stock(&self, clamp: bool) {
        self.state().clamp_to_stock = clamp;
    }

    /// Fail the next cart call with `error`. Calls queue up in order.
    pub fn fail_next(&self, error: GatewayError) {
        self.state().failures.push_back(error);
    }

    /// Hold every cart call until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    /// Cart calls that got past the pause gate.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Server-side lines of a cart.
    #[must_use]
    pub fn cart_items(&self, token: &CartToken) -> Option<Vec<CartItem>> {
        self.state().carts.get(token).map(|cart| cart.items.clone())
    }

    /// Drop a cart, as if it expired server side.
    pub fn expire_cart(&self, token: &CartToken) {
        self.state().carts.remove(token);
    }

    /// Create a user cart holding `lines`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Rejected` for unknown products.
    pub fn seed_user_cart(
        &self,
        token: &CartToken,
        user_id: UserId,
        lines: &[(ProductId, u32)],
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        let mut items = Vec::new();
        for &(product_id, quantity) in lines {
            items.push(state.line(product_id, quantity)?);
        }
        state.carts.insert(
            token.clone(),
            MemoryCart {
                owner: Some(user_id),
                items,
            },
        );
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait at the pause gate, count the call and pop an injected failure.
    async fn enter(&self) -> Result<(), GatewayError> {
        let mut paused = self.inner.paused.subscribe();
        if paused.wait_for(|paused| !*paused).await.is_err() {
            return Err(GatewayError::Unreachable("service stopped".to_string()));
        }
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.state().failures.pop_front().map_or(Ok(()), Err)
    }

    /// Run a mutation once per operation token.
    async fn mutate(
        &self,
        op: OperationToken,
        apply: impl FnOnce(&mut MemoryState) -> Result<Vec<CartItem>, GatewayError> + Send,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.enter().await?;
        let mut state = self.state();
        if let Some(replayed) = state.replays.get(&op) {
            return replayed.clone();
        }
        let result = apply(&mut state);
        state.replays.insert(op, result.clone());
        result
    }
}

impl MemoryState {
    fn product(&self, id: ProductId) -> Result<&Product, GatewayError> {
        self.products
            .get(&id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown product {id}")))
    }

    fn line(&self, id: ProductId, quantity: u32) -> Result<CartItem, GatewayError> {
        let product = self.product(id)?;
        Ok(CartItem {
            product_id: id,
            quantity,
            unit_price: product.price,
            product: product.snapshot(),
        })
    }

    fn stock(&self, id: ProductId) -> Result<u32, GatewayError> {
        self.product(id).map(|product| product.stock)
    }

    /// Anonymous carts must exist; user carts are created on first use.
    fn cart_mut(&mut self, identity: &CartIdentity) -> Result<&mut MemoryCart, GatewayError> {
        let token = &identity.cart_id;
        match identity.user_id() {
            Some(user_id) => Ok(self.carts.entry(token.clone()).or_insert_with(|| MemoryCart {
                owner: Some(user_id),
                items: Vec::new(),
            })),
            None => self
                .carts
                .get_mut(token)
                .ok_or_else(|| GatewayError::InvalidIdentity(token.clone())),
        }
    }

    fn add(
        &mut self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Vec<CartItem>, GatewayError> {
        if quantity == 0 {
            return Err(GatewayError::Rejected("quantity must be at least 1".to_string()));
        }
        let stock = self.stock(product_id)?;
        let new_line = self.line(product_id, 0)?;
        let clamp = self.clamp_to_stock;
        let cart = self.cart_mut(identity)?;

        let in_cart = cart
            .items
            .iter()
            .find(|line| line.product_id == product_id)
            .map_or(0, |line| line.quantity);
        let mut target = in_cart.saturating_add(quantity);
        if target > stock {
            if !clamp {
                return Err(GatewayError::OutOfStock {
                    product_id,
                    available: stock.saturating_sub(in_cart),
                });
            }
            target = stock;
        }

        match cart.items.iter_mut().find(|line| line.product_id == product_id) {
            Some(line) => line.quantity = target,
            None if target > 0 => cart.items.push(CartItem {
                quantity: target,
                ..new_line
            }),
            None => {}
        }
        Ok(cart.items.clone())
    }

    fn set_quantity(
        &mut self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let stock = self.stock(product_id)?;
        let clamp = self.clamp_to_stock;
        let cart = self.cart_mut(identity)?;

        if quantity == 0 {
            cart.items.retain(|line| line.product_id != product_id);
            return Ok(cart.items.clone());
        }

        let Some(line) = cart.items.iter_mut().find(|line| line.product_id == product_id) else {
            return Err(GatewayError::Rejected(format!("product {product_id} is not in the cart")));
        };
        if quantity > stock && !clamp {
            return Err(GatewayError::OutOfStock {
                product_id,
                available: stock,
            });
        }
        line.quantity = quantity.min(stock);
        Ok(cart.items.clone())
    }

    fn merge(
        &mut self,
        guest: &CartIdentity,
        user: &CartIdentity,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let guest_cart = self
            .carts
            .remove(&guest.cart_id)
            .ok_or_else(|| GatewayError::InvalidIdentity(guest.cart_id.clone()))?;

        let stocks: HashMap<ProductId, u32> = self
            .products
            .iter()
            .map(|(id, product)| (*id, product.stock))
            .collect();
        let cart = self.cart_mut(user)?;

        for guest_line in guest_cart.items {
            let cap = stocks.get(&guest_line.product_id).copied().unwrap_or(0);
            match cart
                .items
                .iter_mut()
                .find(|line| line.product_id == guest_line.product_id)
            {
                Some(line) => {
                    line.quantity = line.quantity.saturating_add(guest_line.quantity).min(cap);
                }
                None => cart.items.push(CartItem {
                    quantity: guest_line.quantity.min(cap),
                    ..guest_line
                }),
            }
        }
        cart.items.retain(|line| line.quantity > 0);
        Ok(cart.items.clone())
    }
}

#[async_trait]
impl CartGateway for InMemoryCartService {
    async fn fetch_or_create(
        &self,
        persisted: Option<&CartIdentity>,
    ) -> Result<RemoteCart, GatewayError> {
        self.enter().await?;
        let mut state = self.state();

        let Some(identity) = persisted else {
            let token = CartToken::new(Uuid::new_v4().to_string());
            state.carts.insert(token.clone(), MemoryCart::default());
            return Ok(RemoteCart {
                identity: CartIdentity::anonymous(token),
                items: Vec::new(),
            });
        };

        let cart = state.cart_mut(identity)?;
        if cart.owner != identity.user_id() {
            return Err(GatewayError::InvalidIdentity(identity.cart_id.clone()));
        }
        Ok(RemoteCart {
            identity: identity.clone(),
            items: cart.items.clone(),
        })
    }

    async fn add_item(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.mutate(op, |state| state.add(identity, product_id, quantity))
            .await
    }

    async fn remove_item(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.mutate(op, |state| state.set_quantity(identity, product_id, 0))
            .await
    }

    async fn update_quantity(
        &self,
        identity: &CartIdentity,
        product_id: ProductId,
        quantity: u32,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.mutate(op, |state| state.set_quantity(identity, product_id, quantity))
            .await
    }

    async fn merge_carts(
        &self,
        guest: &CartIdentity,
        user: &CartIdentity,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.mutate(op, |state| state.merge(guest, user)).await
    }

    async fn clear(
        &self,
        identity: &CartIdentity,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        self.mutate(op, |state| {
            let cart = state.cart_mut(identity)?;
            cart.items.clear();
            Ok(Vec::new())
        })
        .await
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCartService {
    async fn get_product(&self, id: ProductId) -> Result<Product, ServiceError> {
        self.state()
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("product {id}")))
    }

    async fn list_products(&self, vendor: Option<VendorId>) -> Result<Vec<Product>, ServiceError> {
        Ok(self
            .state()
            .products
            .values()
            .filter(|product| vendor.is_none() || product.vendor_id == vendor)
            .cloned()
            .collect())
    }
}
