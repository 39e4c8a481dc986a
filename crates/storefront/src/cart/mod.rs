//! Client-side cart: the observable store and the synchronizer that keeps it
//! consistent with the cart-of-record.

mod mutation;
mod store;
mod synchronizer;


pub use store::{CartStore, Subscription};
pub use synchronizer::{
    AuthenticatedUser, CartNotice, CartSynchronizer, DEFAULT_CALL_TIMEOUT, JobHandle,
    MutationHandle, SyncPhase,
};
