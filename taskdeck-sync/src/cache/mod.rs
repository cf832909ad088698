//! Client-side response cache.

mod key;
mod store;

pub use key::{normalize, CacheKey};
pub use store::{
    CacheEntry, CacheStore, DeferredDelivery, EntryStatus, Listener, RequestTicket, Settlement,
    SubscriptionId,
};
