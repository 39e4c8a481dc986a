//! The in-memory cart mirror observed by UI surfaces.
//!
//! Readers get snapshots, synchronous listeners or a `watch` receiver. The
//! only write path is crate-private and owned by the synchronizer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use marketstall_core::{Cart, CartIdentity, CartItem, normalize_items};
use tokio::sync::watch;

type Listener = Arc<dyn Fn(&Cart) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

/// Single source of truth for the session's cart.
pub struct CartStore {
    sender: watch::Sender<Arc<Cart>>,
    listeners: Mutex<Listeners>,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("cart", &*self.sender.borrow())
            .field("listeners", &self.listeners().entries.len())
            .finish()
    }
}

impl CartStore {
    pub(crate) fn new(cart: Cart) -> Arc<Self> {
        let (sender, _) = watch::channel(Arc::new(cart));
        Arc::new(Self {
            sender,
            listeners: Mutex::new(Listeners::default()),
        })
    }

    /// The current cart.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Cart> {
        Arc::clone(&self.sender.borrow())
    }

    /// Current version, bumped on every write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.sender.borrow().version
    }

    /// Observe changes from async tasks.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<Cart>> {
        self.sender.subscribe()
    }

    /// Register a listener called after every write.
    ///
    /// Listeners run on the writing thread and must not call back into the
    /// synchronizer.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&Cart) + Send + Sync + 'static,
    ) -> Subscription {
        let mut listeners = self.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));

        Subscription {
            store: Arc::downgrade(self),
            id,
        }
    }

    /// Replace the cart, normalizing items and bumping the version.
    ///
    /// Returns the new version.
    pub(crate) fn set_cart(&self, identity: CartIdentity, items: Vec<CartItem>) -> u64 {
        let version = self.version() + 1;
        let cart = Arc::new(Cart {
            identity,
            items: normalize_items(items),
            version,
        });
        self.sender.send_replace(Arc::clone(&cart));

        // Clone out so listeners run without the registry lock
        let listeners: Vec<Listener> = self.listeners().entries.values().cloned().collect();
        for listener in listeners {
            listener(&cart);
        }
        version
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners().entries.remove(&id);
    }
}

/// Listener registration; unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<CartStore>,
    id: u64,
}

impl Subscription {
    /// Stop receiving updates.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use marketstall_core::{CartToken, CurrencyCode, Price, ProductId, ProductSnapshot};

    use super::*;

    fn identity() -> CartIdentity {
        CartIdentity::anonymous(CartToken::new("c-1"))
    }

    fn line(id: i32, quantity: u32) -> CartItem {
        CartItem {
            product_id: ProductId::new(id),
            quantity,
            unit_price: Price::from_cents(100, CurrencyCode::USD),
            product: ProductSnapshot {
                id: ProductId::new(id),
                title: "P".to_string(),
                image: None,
            },
        }
    }

    #[test]
    fn test_set_cart_normalizes_and_bumps_version() {
        let store = CartStore::new(Cart::empty(identity()));
        let version = store.set_cart(identity(), vec![line(1, 1), line(1, 2), line(2, 0)]);

        let cart = store.snapshot();
        assert_eq!(version, 1);
        assert_eq!(cart.version, 1);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.quantity_of(ProductId::new(1)), 3);
    }

    #[test]
    fn test_listener_notified_until_unsubscribed() {
        let store = CartStore::new(Cart::empty(identity()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let subscription = store.subscribe(move |cart| {
            assert!(cart.version > 0);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.set_cart(identity(), vec![line(1, 1)]);
        store.set_cart(identity(), vec![]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        store.set_cart(identity(), vec![line(2, 1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_watch_sees_latest_cart() {
        let store = CartStore::new(Cart::empty(identity()));
        let mut rx = store.watch();
        store.set_cart(identity(), vec![line(3, 2)]);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().quantity_of(ProductId::new(3)), 2);
    }
}
