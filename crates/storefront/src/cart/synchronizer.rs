//! Cart synchronizer: the only writer of the [`CartStore`].
//!
//! Every operation is applied to the store optimistically at call time and
//! queued on the cart's lane, a FIFO drained by one worker task. The worker
//! sends jobs to the gateway one at a time, so remote state changes in the
//! order the calls were made.
//!
//! The ledger keeps the last server-acknowledged item list (the confirmed
//! baseline) and the mutations still in flight. A failed mutation leaves the
//! ledger and the store is rebuilt as baseline plus the remaining pending
//! mutations. A successful response is written to the store only if nothing
//! was written after the mutation's own optimistic write.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use marketstall_core::{Cart, CartIdentity, CartItem, CartToken, ProductId, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::mutation::CartMutation;
use super::store::CartStore;
use crate::catalog::Product;
use crate::error::{self, CartError};
use crate::gateway::{CartGateway, GatewayError, OperationToken, RemoteCart};
use crate::identity::IdentityStore;

/// Upper bound for a single gateway call when none is configured.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the synchronizer is in processing its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing in flight.
    Idle,
    /// A job is waiting on the gateway.
    Mutating,
    /// A response is being folded into the ledger and store.
    Reconciling,
}

/// A user as issued by the external authentication service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    /// The user's cart on the cart-of-record.
    pub cart_id: CartToken,
    pub email: Option<String>,
}

/// Something the shopper should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartNotice {
    /// The server granted fewer units than the cart asked for.
    QuantityAdjusted {
        product_id: ProductId,
        requested: u32,
        granted: u32,
    },
    /// The anonymous cart expired and a new one replaced it.
    CartReset {
        previous: CartToken,
        lost_items: usize,
    },
}

/// Result of a queued job.
///
/// Dropping the handle does not cancel the job.
#[must_use = "the result reports whether the server accepted the change"]
pub struct JobHandle<T> {
    state: HandleState<T>,
}

enum HandleState<T> {
    Ready(Option<Result<T, CartError>>),
    Waiting(oneshot::Receiver<Result<T, CartError>>),
}

/// Handle for a cart mutation; resolves to the server's item list.
pub type MutationHandle = JobHandle<Vec<CartItem>>;

impl<T> JobHandle<T> {
    const fn ready(result: Result<T, CartError>) -> Self {
        Self {
            state: HandleState::Ready(Some(result)),
        }
    }

    const fn waiting(rx: oneshot::Receiver<Result<T, CartError>>) -> Self {
        Self {
            state: HandleState::Waiting(rx),
        }
    }
}

// The receiver is polled through `Pin::new`; nothing is structurally pinned.
impl<T> Unpin for JobHandle<T> {}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, CartError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CartError::SessionClosed)))
            }
            HandleState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CartError::SessionClosed))),
        }
    }
}

enum Job {
    Mutation {
        seq: u64,
        reply: oneshot::Sender<Result<Vec<CartItem>, CartError>>,
    },
    Login {
        user: AuthenticatedUser,
        reply: oneshot::Sender<Result<Arc<Cart>, CartError>>,
    },
    Logout {
        reply: oneshot::Sender<Result<Arc<Cart>, CartError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<Arc<Cart>, CartError>>,
    },
    Settle {
        reply: oneshot::Sender<Result<Arc<Cart>, CartError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), CartError>>,
    },
}

struct PendingEntry {
    seq: u64,
    mutation: CartMutation,
    op: OperationToken,
    /// Store version right after this entry's optimistic write.
    version: u64,
}

struct Ledger {
    identity: CartIdentity,
    confirmed: Vec<CartItem>,
    pending: VecDeque<PendingEntry>,
    notices: Vec<CartNotice>,
    known_stock: HashMap<ProductId, u32>,
    next_seq: u64,
    phase: SyncPhase,
    closed: bool,
}

impl Ledger {
    /// Rewrite the store as baseline plus pending mutations.
    fn rebuild(&mut self, store: &CartStore) {
        let mut items = self.confirmed.clone();
        for entry in &self.pending {
            entry.mutation.apply(&mut items);
        }
        let version = store.set_cart(self.identity.clone(), items);
        if let Some(tail) = self.pending.back_mut() {
            tail.version = version;
        }
    }

    /// Switch to a new identity and baseline, keeping pending mutations.
    fn rebase(&mut self, store: &CartStore, remote: RemoteCart) {
        self.identity = remote.identity;
        self.confirmed = remote.items;
        self.rebuild(store);
    }
}

/// State shared between the public handle and the worker.
struct Shared {
    store: Arc<CartStore>,
    gateway: Arc<dyn CartGateway>,
    identities: Arc<dyn IdentityStore>,
    ledger: Mutex<Ledger>,
    call_timeout: Duration,
}

/// Orchestrates initialization, mutation sequencing and identity migration
/// for one session's cart.
#[derive(Clone)]
pub struct CartSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    shared: Arc<Shared>,
    lane: mpsc::UnboundedSender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CartSynchronizer {
    /// Resolve the session's anonymous cart and start the worker.
    ///
    /// The persisted token is tried first; a stale token is replaced by a
    /// freshly provisioned cart, whose token is persisted before this returns.
    /// `call_timeout` bounds each gateway call, retries included.
    ///
    /// # Errors
    ///
    /// Returns an error if no cart could be fetched or created.
    pub async fn start(
        gateway: Arc<dyn CartGateway>,
        identities: Arc<dyn IdentityStore>,
        call_timeout: Duration,
    ) -> Result<Self, CartError> {
        let remote = resolve_anonymous(gateway.as_ref(), identities.as_ref(), call_timeout)
            .await
            .map_err(|e| CartError::from_gateway(e, 0))?;

        info!(
            cart_id = %remote.identity.cart_id,
            items = remote.items.len(),
            "Cart initialized"
        );

        let store = CartStore::new(Cart::empty(remote.identity.clone()));
        store.set_cart(remote.identity.clone(), remote.items.clone());

        let shared = Arc::new(Shared {
            store,
            gateway,
            identities,
            ledger: Mutex::new(Ledger {
                identity: remote.identity,
                confirmed: remote.items,
                pending: VecDeque::new(),
                notices: Vec::new(),
                known_stock: HashMap::new(),
                next_seq: 0,
                phase: SyncPhase::Idle,
                closed: false,
            }),
            call_timeout,
        });

        let (lane, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_lane(Arc::clone(&shared), rx));

        Ok(Self {
            inner: Arc::new(SyncInner {
                shared,
                lane,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// The cart store this synchronizer writes.
    #[must_use]
    pub fn store(&self) -> &Arc<CartStore> {
        &self.inner.shared.store
    }

    /// Current processing phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.inner.shared.ledger().phase
    }

    /// Number of mutations not yet answered by the server.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.shared.ledger().pending.len()
    }

    /// Take the notices accumulated since the last call.
    #[must_use]
    pub fn drain_notices(&self) -> Vec<CartNotice> {
        std::mem::take(&mut self.inner.shared.ledger().notices)
    }

    /// Add `quantity` units of `product`.
    ///
    /// Applied to the store before this returns; the handle resolves when
    /// the server answered.
    pub fn add_item(&self, product: &Product, quantity: u32) -> MutationHandle {
        let (id, qty) = (product.id.to_string(), quantity.to_string());
        error::add_breadcrumb(
            "cart",
            "Add item",
            Some(&[("product_id", id.as_str()), ("quantity", qty.as_str())]),
        );

        if quantity == 0 {
            return JobHandle::ready(Err(CartError::InvalidQuantity {
                product_id: product.id,
                quantity,
            }));
        }

        let mutation = CartMutation::Add {
            product: product.snapshot(),
            unit_price: product.price,
            quantity,
        };
        self.submit(mutation, |ledger, current| {
            ledger.known_stock.insert(product.id, product.stock);
            let in_cart = current.quantity_of(product.id);
            if in_cart.saturating_add(quantity) > product.stock {
                return Err(CartError::OutOfStock {
                    product_id: product.id,
                    requested: quantity,
                    available: product.stock.saturating_sub(in_cart),
                });
            }
            Ok(())
        })
    }

    /// Remove a product's line.
    pub fn remove_item(&self, product_id: ProductId) -> MutationHandle {
        let id = product_id.to_string();
        error::add_breadcrumb("cart", "Remove item", Some(&[("product_id", id.as_str())]));

        self.submit(CartMutation::Remove { product_id }, |_, current| {
            require_line(current, product_id)
        })
    }

    /// Set a line's quantity; 0 removes the line.
    pub fn update_quantity(&self, product_id: ProductId, quantity: u32) -> MutationHandle {
        let (id, qty) = (product_id.to_string(), quantity.to_string());
        error::add_breadcrumb(
            "cart",
            "Update quantity",
            Some(&[("product_id", id.as_str()), ("quantity", qty.as_str())]),
        );

        let mutation = CartMutation::SetQuantity {
            product_id,
            quantity,
        };
        self.submit(mutation, |ledger, current| {
            require_line(current, product_id)?;
            match ledger.known_stock.get(&product_id) {
                Some(&stock) if quantity > stock => Err(CartError::OutOfStock {
                    product_id,
                    requested: quantity,
                    available: stock,
                }),
                _ => Ok(()),
            }
        })
    }

    /// Switch to the user's cart, merging a non-empty guest cart into it.
    ///
    /// Runs after every mutation submitted before it. If the merge fails the
    /// anonymous cart stays active and `MergeFailed` is returned.
    pub fn login(&self, user: AuthenticatedUser) -> JobHandle<Arc<Cart>> {
        let user_id = user.user_id.to_string();
        error::add_breadcrumb("auth", "Login", Some(&[("user_id", user_id.as_str())]));
        self.enqueue(|reply| Job::Login { user, reply })
    }

    /// Release the user's cart and return to an anonymous one.
    pub fn logout(&self) -> JobHandle<Arc<Cart>> {
        error::add_breadcrumb("auth", "Logout", None);
        self.enqueue(|reply| Job::Logout { reply })
    }

    /// Start over with an empty cart of the same kind after an order.
    pub fn reset_after_order(&self) -> JobHandle<Arc<Cart>> {
        self.enqueue(|reply| Job::Reset { reply })
    }

    /// Wait for every job submitted so far and return the resulting cart.
    pub fn settle(&self) -> JobHandle<Arc<Cart>> {
        self.enqueue(|reply| Job::Settle { reply })
    }

    /// Drain queued jobs, then stop the worker.
    ///
    /// Later calls fail with `SessionClosed`.
    pub async fn shutdown(&self) {
        let handle = {
            let mut ledger = self.inner.shared.ledger();
            let handle = self.push_job(&ledger, |reply| Job::Shutdown { reply });
            ledger.closed = true;
            handle
        };
        let _ = handle.await;

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Cart worker ended abnormally");
        }
        info!("Cart synchronizer stopped");
    }

    /// Validate, apply optimistically and queue a mutation.
    fn submit(
        &self,
        mutation: CartMutation,
        validate: impl FnOnce(&mut Ledger, &Cart) -> Result<(), CartError>,
    ) -> MutationHandle {
        let shared = &self.inner.shared;
        let mut ledger = shared.ledger();
        if ledger.closed {
            return JobHandle::ready(Err(CartError::SessionClosed));
        }

        let current = shared.store.snapshot();
        if let Err(e) = validate(&mut *ledger, &current) {
            return JobHandle::ready(Err(e));
        }

        let mut items = current.items.clone();
        mutation.apply(&mut items);
        let version = shared.store.set_cart(ledger.identity.clone(), items);

        let seq = ledger.next_seq;
        ledger.next_seq += 1;
        ledger.pending.push_back(PendingEntry {
            seq,
            mutation,
            op: OperationToken::new(),
            version,
        });

        let (reply, rx) = oneshot::channel();
        if self.inner.lane.send(Job::Mutation { seq, reply }).is_err() {
            ledger.pending.retain(|entry| entry.seq != seq);
            ledger.rebuild(&shared.store);
            return JobHandle::ready(Err(CartError::SessionClosed));
        }
        JobHandle::waiting(rx)
    }

    fn enqueue<T>(
        &self,
        job: impl FnOnce(oneshot::Sender<Result<T, CartError>>) -> Job,
    ) -> JobHandle<T> {
        // Hold the ledger lock so lane order matches call order
        let ledger = self.inner.shared.ledger();
        self.push_job(&ledger, job)
    }

    /// Put a job on the lane; the caller holds the ledger lock.
    fn push_job<T>(
        &self,
        ledger: &Ledger,
        job: impl FnOnce(oneshot::Sender<Result<T, CartError>>) -> Job,
    ) -> JobHandle<T> {
        if ledger.closed {
            return JobHandle::ready(Err(CartError::SessionClosed));
        }
        let (reply, rx) = oneshot::channel();
        if self.inner.lane.send(job(reply)).is_err() {
            return JobHandle::ready(Err(CartError::SessionClosed));
        }
        JobHandle::waiting(rx)
    }
}

/// Reject changes to products that are not in the cart.
fn require_line(current: &Cart, product_id: ProductId) -> Result<(), CartError> {
    if current.item(product_id).is_some() {
        Ok(())
    } else {
        Err(CartError::NotInCart { product_id })
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn run_lane(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Mutation { seq, reply } => {
                let result = shared.process_mutation(seq).await;
                if let Err(e) = &result
                    && e.is_server_side()
                {
                    error::capture(e, "cart mutation");
                }
                let _ = reply.send(result);
            }
            Job::Login { user, reply } => {
                let result = shared.login(user).await;
                let _ = reply.send(result);
            }
            Job::Logout { reply } => {
                let result = shared.logout().await;
                let _ = reply.send(result);
            }
            Job::Reset { reply } => {
                let result = shared.reset().await;
                let _ = reply.send(result);
            }
            Job::Settle { reply } => {
                let _ = reply.send(Ok(shared.store.snapshot()));
            }
            Job::Shutdown { reply } => {
                shared.set_phase(SyncPhase::Idle);
                let _ = reply.send(Ok(()));
                break;
            }
        }
        shared.set_phase(SyncPhase::Idle);
    }
    debug!("Cart lane closed");
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.ledger().phase = phase;
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        bounded(self.call_timeout, fut).await
    }

    async fn send_mutation(
        &self,
        identity: &CartIdentity,
        mutation: &CartMutation,
        op: OperationToken,
    ) -> Result<Vec<CartItem>, GatewayError> {
        let gateway = self.gateway.as_ref();
        match mutation {
            CartMutation::Add {
                product, quantity, ..
            } => {
                self.call(gateway.add_item(identity, product.id, *quantity, op))
                    .await
            }
            CartMutation::Remove { product_id } => {
                self.call(gateway.remove_item(identity, *product_id, op))
                    .await
            }
            CartMutation::SetQuantity {
                product_id,
                quantity,
            } => {
                self.call(gateway.update_quantity(identity, *product_id, *quantity, op))
                    .await
            }
        }
    }

    async fn process_mutation(&self, seq: u64) -> Result<Vec<CartItem>, CartError> {
        let (identity, mutation, op) = {
            let mut ledger = self.ledger();
            ledger.phase = SyncPhase::Mutating;
            let Some(entry) = ledger.pending.iter().find(|entry| entry.seq == seq) else {
                return Err(CartError::Protocol(format!("no pending mutation #{seq}")));
            };
            let (mutation, op) = (entry.mutation.clone(), entry.op);
            (ledger.identity.clone(), mutation, op)
        };

        debug!(seq, cart_id = %identity.cart_id, ?mutation, "Sending cart mutation");
        let mut result = self.send_mutation(&identity, &mutation, op).await;

        if identity.is_anonymous()
            && let Err(GatewayError::InvalidIdentity(token)) = &result
        {
            warn!(cart_id = %token, "Anonymous cart expired, provisioning a new one");
            result = match self.replace_anonymous_cart(&identity).await {
                Ok(fresh) => {
                    self.set_phase(SyncPhase::Mutating);
                    self.send_mutation(&fresh, &mutation, OperationToken::new())
                        .await
                }
                Err(e) => Err(e),
            };
        }

        self.finish_mutation(seq, result)
    }

    /// Fold a mutation's outcome into the ledger and store.
    fn finish_mutation(
        &self,
        seq: u64,
        result: Result<Vec<CartItem>, GatewayError>,
    ) -> Result<Vec<CartItem>, CartError> {
        let mut ledger = self.ledger();
        ledger.phase = SyncPhase::Reconciling;

        let Some(position) = ledger.pending.iter().position(|entry| entry.seq == seq) else {
            return Err(CartError::Protocol(format!("no pending mutation #{seq}")));
        };
        let Some(entry) = ledger.pending.remove(position) else {
            return Err(CartError::Protocol(format!("no pending mutation #{seq}")));
        };

        match result {
            Ok(items) => {
                let mut expected = ledger.confirmed.clone();
                entry.mutation.apply(&mut expected);
                let product_id = entry.mutation.product_id();
                let requested = quantity_in(&expected, product_id);
                let granted = quantity_in(&items, product_id);
                if granted < requested {
                    info!(%product_id, requested, granted, "Server adjusted quantity");
                    ledger.notices.push(CartNotice::QuantityAdjusted {
                        product_id,
                        requested,
                        granted,
                    });
                }

                ledger.confirmed.clone_from(&items);
                if self.store.version() == entry.version {
                    self.store.set_cart(ledger.identity.clone(), items.clone());
                } else {
                    debug!(seq, "Response superseded by a later write, not applied");
                }
                Ok(items)
            }
            Err(e) => {
                warn!(seq, error = %e, "Cart mutation failed, rolling back");
                ledger.rebuild(&self.store);
                Err(CartError::from_gateway(
                    e,
                    entry.mutation.requested_quantity(),
                ))
            }
        }
    }

    /// Provision a new anonymous cart after the old one became invalid.
    async fn replace_anonymous_cart(
        &self,
        stale: &CartIdentity,
    ) -> Result<CartIdentity, GatewayError> {
        self.set_phase(SyncPhase::Reconciling);
        let remote = self.call(self.gateway.fetch_or_create(None)).await?;
        persist(self.identities.as_ref(), &remote.identity.cart_id).await;

        let mut ledger = self.ledger();
        let lost_items = ledger.confirmed.len();
        if lost_items > 0 {
            ledger.notices.push(CartNotice::CartReset {
                previous: stale.cart_id.clone(),
                lost_items,
            });
        }
        let fresh = remote.identity.clone();
        ledger.rebase(&self.store, remote);
        Ok(fresh)
    }

    async fn login(&self, user: AuthenticatedUser) -> Result<Arc<Cart>, CartError> {
        self.set_phase(SyncPhase::Mutating);
        let (guest, guest_items) = {
            let ledger = self.ledger();
            (ledger.identity.clone(), ledger.confirmed.clone())
        };
        let user_identity = CartIdentity::authenticated(user.cart_id.clone(), user.user_id);

        let remote = if guest.is_anonymous() && !guest_items.is_empty() {
            let items = self
                .call(
                    self.gateway
                        .merge_carts(&guest, &user_identity, OperationToken::new()),
                )
                .await
                .map_err(|e| {
                    warn!(error = %e, "Cart merge failed, keeping guest cart");
                    CartError::MergeFailed(e)
                })?;

            self.set_phase(SyncPhase::Reconciling);
            if let Err(e) = self.identities.clear().await {
                warn!(error = %e, "Failed to clear anonymous cart token");
            }
            info!(
                guest_cart = %guest.cart_id,
                user_cart = %user_identity.cart_id,
                lines = items.len(),
                "Merged guest cart into user cart"
            );
            RemoteCart {
                identity: user_identity,
                items,
            }
        } else {
            self.call(self.gateway.fetch_or_create(Some(&user_identity)))
                .await
                .map_err(|e| CartError::from_gateway(e, 0))?
        };

        error::set_sentry_user(&user.user_id, user.email.as_deref());
        let mut ledger = self.ledger();
        ledger.rebase(&self.store, remote);
        Ok(self.store.snapshot())
    }

    async fn logout(&self) -> Result<Arc<Cart>, CartError> {
        if self.ledger().identity.is_anonymous() {
            return Ok(self.store.snapshot());
        }
        self.set_phase(SyncPhase::Mutating);
        let remote = resolve_anonymous(
            self.gateway.as_ref(),
            self.identities.as_ref(),
            self.call_timeout,
        )
        .await
        .map_err(|e| CartError::from_gateway(e, 0))?;

        error::clear_sentry_user();
        let mut ledger = self.ledger();
        ledger.phase = SyncPhase::Reconciling;
        ledger.rebase(&self.store, remote);
        Ok(self.store.snapshot())
    }

    async fn reset(&self) -> Result<Arc<Cart>, CartError> {
        self.set_phase(SyncPhase::Mutating);
        let identity = self.ledger().identity.clone();

        let remote = if identity.is_anonymous() {
            if let Err(e) = self.identities.clear().await {
                warn!(error = %e, "Failed to clear anonymous cart token");
            }
            let remote = self
                .call(self.gateway.fetch_or_create(None))
                .await
                .map_err(|e| CartError::from_gateway(e, 0))?;
            persist(self.identities.as_ref(), &remote.identity.cart_id).await;
            remote
        } else {
            let items = self
                .call(self.gateway.clear(&identity, OperationToken::new()))
                .await
                .map_err(|e| CartError::from_gateway(e, 0))?;
            RemoteCart { identity, items }
        };

        info!(cart_id = %remote.identity.cart_id, "Cart reset after order");
        let mut ledger = self.ledger();
        ledger.phase = SyncPhase::Reconciling;
        ledger.rebase(&self.store, remote);
        Ok(self.store.snapshot())
    }
}

fn quantity_in(items: &[CartItem], product_id: ProductId) -> u32 {
    items
        .iter()
        .find(|item| item.product_id == product_id)
        .map_or(0, |item| item.quantity)
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::Unreachable(format!(
                "no response within {}ms",
                limit.as_millis()
            )))
        })
}

async fn persist(identities: &dyn IdentityStore, token: &CartToken) {
    if let Err(e) = identities.save(token).await {
        warn!(cart_id = %token, error = %e, "Failed to persist anonymous cart token");
    }
}

/// Find the anonymous cart for this client, creating one if needed.
async fn resolve_anonymous(
    gateway: &dyn CartGateway,
    identities: &dyn IdentityStore,
    limit: Duration,
) -> Result<RemoteCart, GatewayError> {
    let persisted = identities.load().await.unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable anonymous cart token");
        None
    });

    if let Some(token) = persisted {
        let identity = CartIdentity::anonymous(token);
        match bounded(limit, gateway.fetch_or_create(Some(&identity))).await {
            Ok(remote) => return Ok(remote),
            Err(GatewayError::InvalidIdentity(token)) => {
                info!(cart_id = %token, "Persisted cart is gone, provisioning a new one");
            }
            Err(e) => return Err(e),
        }
    }

    let remote = bounded(limit, gateway.fetch_or_create(None)).await?;
    persist(identities, &remote.identity.cart_id).await;
    Ok(remote)
}
