//! Tagged response cache.
//!
//! One entry per [`CacheKey`]. Every network request for a key is issued
//! against a [`RequestTicket`] carrying a store-wide sequence number; a result
//! is only applied if its sequence is newer than the last applied one, so the
//! entry always reflects the most recently *dispatched* request that has
//! settled, regardless of completion order.
//!
//! Listeners are invoked after the store lock is released, with a snapshot of
//! the entry as it was when the transition finished.

use super::key::CacheKey;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskdeck_core::{ApiFailure, Clock, Payload, Tag, Timestamp};
use tracing::{debug, warn};

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Uninitialized,
    Pending,
    Fulfilled,
    /// Last known value retained, no longer trusted; a refetch is pending.
    Stale,
    Rejected,
}

/// Snapshot of a cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub tags: BTreeSet<Tag>,
    pub value: Option<Payload>,
    pub status: EntryStatus,
    pub last_updated_at: Option<Timestamp>,
    pub error: Option<ApiFailure>,
    pub subscribers: usize,
    /// A request newer than the applied value is in flight.
    pub is_fetching: bool,
}

impl CacheEntry {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            tags: BTreeSet::new(),
            value: None,
            status: EntryStatus::Uninitialized,
            last_updated_at: None,
            error: None,
            subscribers: 0,
            is_fetching: false,
        }
    }

    /// Whether the value can be served without a network call.
    pub fn is_fresh(&self) -> bool {
        self.status == EntryStatus::Fulfilled && self.value.is_some()
    }

    pub fn provides(&self, invalidated: &Tag) -> bool {
        self.tags.iter().any(|tag| invalidated.matches(tag))
    }
}

/// Callback receiving entry snapshots after each transition.
pub type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Handle for one dispatched request against one key.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    key: CacheKey,
    seq: u64,
    epoch: u64,
    started_at: Timestamp,
}

impl RequestTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }
}

/// What happened to a settled request's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Applied,
    /// Applied, but a matching tag was invalidated after the request was
    /// dispatched, so the entry stays stale. Carries whether it has subscribers.
    AppliedStale { subscribed: bool },
    /// Superseded by a newer request, evicted, or cleared.
    Discarded,
}

// ============================================================================
// STORE
// ============================================================================

struct Slot {
    entry: CacheEntry,
    listeners: BTreeMap<SubscriptionId, Listener>,
    latest_dispatched: u64,
    applied: u64,
}

impl Slot {
    /// `floor` is the last sequence issued before the slot existed. Requests
    /// at or below it belong to an evicted predecessor and are never applied.
    fn new(key: CacheKey, floor: u64) -> Self {
        Self {
            entry: CacheEntry::new(key),
            listeners: BTreeMap::new(),
            latest_dispatched: floor,
            applied: floor,
        }
    }

    fn snapshot(&self) -> CacheEntry {
        let mut entry = self.entry.clone();
        entry.subscribers = self.listeners.len();
        entry.is_fetching = self.latest_dispatched > self.applied;
        entry
    }

    fn outstanding_floor(&self) -> Option<u64> {
        (self.latest_dispatched > self.applied).then_some(self.applied + 1)
    }
}

#[derive(Default)]
struct StoreState {
    slots: HashMap<CacheKey, Slot>,
    subscriptions: HashMap<SubscriptionId, CacheKey>,
    /// `(sequence at invalidation time, tag)` kept while older requests may
    /// still be in flight.
    invalidations: Vec<(u64, Tag)>,
    next_seq: u64,
    next_subscription: u64,
    epoch: u64,
}

impl StoreState {
    fn prune_invalidations(&mut self) {
        let floor = self.slots.values().filter_map(Slot::outstanding_floor).min();
        match floor {
            Some(floor) => self.invalidations.retain(|(at, _)| *at > floor),
            None => self.invalidations.clear(),
        }
    }

    fn invalidated_since(&self, seq: u64, tags: &BTreeSet<Tag>) -> bool {
        self.invalidations
            .iter()
            .any(|(at, inv)| *at > seq && tags.iter().any(|t| inv.matches(t)))
    }
}

type Notification = (Vec<Listener>, CacheEntry);

/// Listener calls held back from a transition.
#[must_use = "listeners only run when delivered"]
pub struct DeferredDelivery(Notification);

impl DeferredDelivery {
    pub fn deliver(self) {
        deliver(self.0);
    }
}

/// Shared cache handle. Cloning shares the underlying store.
#[derive(Clone)]
pub struct CacheStore {
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.len())
            .finish()
    }
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Synchronous lookup, no side effects.
    pub fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().slots.get(key).map(Slot::snapshot)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock().slots.keys().cloned().collect()
    }

    /// Keys of every entry currently providing a tag matched by `tag`.
    pub fn keys_tagged(&self, tag: &Tag) -> Vec<CacheKey> {
        self.lock()
            .slots
            .values()
            .filter(|slot| slot.entry.provides(tag))
            .map(|slot| slot.entry.key.clone())
            .collect()
    }

    /// Record a newly dispatched request for `key`.
    ///
    /// Stale entries stay stale (their value is still served); anything else
    /// becomes pending.
    pub fn mark_pending(&self, key: &CacheKey) -> RequestTicket {
        let (ticket, deferred) = self.mark_pending_deferred(key);
        deferred.deliver();
        ticket
    }

    /// [`mark_pending`](Self::mark_pending) without running listeners; the
    /// caller delivers them once it has released its own locks.
    pub fn mark_pending_deferred(&self, key: &CacheKey) -> (RequestTicket, DeferredDelivery) {
        let started_at = self.clock.now();
        let mut state = self.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        let epoch = state.epoch;
        let slot = state
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone(), seq - 1));
        slot.latest_dispatched = seq;
        if slot.entry.status != EntryStatus::Stale {
            slot.entry.status = EntryStatus::Pending;
        }
        debug!(key = %key, seq, "cache entry pending");
        (
            RequestTicket {
                key: key.clone(),
                seq,
                epoch,
                started_at,
            },
            DeferredDelivery(collect(slot)),
        )
    }

    /// Whether a new reader may wait on `ticket` instead of dispatching its own
    /// request.
    ///
    /// False once the ticket's result could no longer reach the entry (cleared,
    /// evicted, superseded or already settled) and once any tag was invalidated
    /// after it was dispatched, since its response may predate that write.
    pub fn is_joinable(&self, ticket: &RequestTicket) -> bool {
        let state = self.lock();
        if ticket.epoch != state.epoch {
            return false;
        }
        let outstanding = state.slots.get(&ticket.key).is_some_and(|slot| {
            slot.latest_dispatched == ticket.seq && slot.applied < ticket.seq
        });
        outstanding && !state.invalidations.iter().any(|(at, _)| *at > ticket.seq)
    }

    /// Apply a successful result for `ticket`, replacing value and tags.
    pub fn upsert(&self, ticket: &RequestTicket, value: Payload, tags: BTreeSet<Tag>) -> Settlement {
        let now = self.clock.now();
        let (settlement, notification) = {
            let mut state = self.lock();
            if !accepts(&state, ticket) {
                return Settlement::Discarded;
            }
            let stale = state.invalidated_since(ticket.seq, &tags);
            let Some(slot) = state.slots.get_mut(&ticket.key) else {
                return Settlement::Discarded;
            };
            slot.applied = ticket.seq;
            slot.entry.value = Some(value);
            slot.entry.tags = tags;
            slot.entry.error = None;
            slot.entry.last_updated_at = Some(now);
            slot.entry.status = if stale {
                EntryStatus::Stale
            } else {
                EntryStatus::Fulfilled
            };
            let settlement = if stale {
                Settlement::AppliedStale {
                    subscribed: !slot.listeners.is_empty(),
                }
            } else {
                Settlement::Applied
            };
            debug!(key = %ticket.key, seq = ticket.seq, stale, "cache entry fulfilled");
            let notification = collect(slot);
            state.prune_invalidations();
            (settlement, notification)
        };
        deliver(notification);
        settlement
    }

    /// Record a failed result for `ticket`. The last known value is kept.
    pub fn mark_rejected(&self, ticket: &RequestTicket, error: ApiFailure) -> Settlement {
        let notification = {
            let mut state = self.lock();
            if !accepts(&state, ticket) {
                return Settlement::Discarded;
            }
            let Some(slot) = state.slots.get_mut(&ticket.key) else {
                return Settlement::Discarded;
            };
            slot.applied = ticket.seq;
            slot.entry.status = EntryStatus::Rejected;
            slot.entry.error = Some(error);
            debug!(key = %ticket.key, seq = ticket.seq, "cache entry rejected");
            let notification = collect(slot);
            state.prune_invalidations();
            notification
        };
        deliver(notification);
        Settlement::Applied
    }

    /// Invalidate one tag. See [`invalidate_tags`](Self::invalidate_tags).
    pub fn invalidate(&self, tag: &Tag) -> Vec<CacheKey> {
        self.invalidate_tags(std::slice::from_ref(tag))
    }

    /// Mark every entry providing any of `tags` stale.
    ///
    /// Entries without subscribers are evicted. Returns the keys of the
    /// subscribed entries, each once, which need a refetch.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<CacheKey> {
        if tags.is_empty() {
            return Vec::new();
        }
        let mut notifications = Vec::new();
        let mut refetch = Vec::new();
        {
            let mut state = self.lock();
            // Requests dispatched before this point carry a smaller sequence.
            let at = state.next_seq + 1;
            for tag in tags {
                state.invalidations.push((at, tag.clone()));
            }
            let matched: Vec<CacheKey> = state
                .slots
                .values()
                .filter(|slot| tags.iter().any(|tag| slot.entry.provides(tag)))
                .map(|slot| slot.entry.key.clone())
                .collect();
            for key in matched {
                let subscribed = state
                    .slots
                    .get(&key)
                    .is_some_and(|slot| !slot.listeners.is_empty());
                if !subscribed {
                    debug!(key = %key, "evicting unsubscribed entry on invalidation");
                    state.slots.remove(&key);
                    continue;
                }
                if let Some(slot) = state.slots.get_mut(&key) {
                    slot.entry.status = EntryStatus::Stale;
                    notifications.push(collect(slot));
                    refetch.push(key);
                }
            }
            state.prune_invalidations();
        }
        for notification in notifications {
            deliver(notification);
        }
        refetch
    }

    /// Register a listener for `key`, creating an uninitialized entry if needed.
    pub fn subscribe(&self, key: &CacheKey, listener: Listener) -> SubscriptionId {
        let mut state = self.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.subscriptions.insert(id, key.clone());
        let floor = state.next_seq;
        state
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(key.clone(), floor))
            .listeners
            .insert(id, listener);
        id
    }

    /// Drop a listener. When the last one leaves an entry that holds no
    /// trusted value (stale, rejected, uninitialized) the entry is evicted.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock();
        let Some(key) = state.subscriptions.remove(&id) else {
            return;
        };
        let evict = match state.slots.get_mut(&key) {
            Some(slot) => {
                slot.listeners.remove(&id);
                slot.listeners.is_empty()
                    && matches!(
                        slot.entry.status,
                        EntryStatus::Stale | EntryStatus::Rejected | EntryStatus::Uninitialized
                    )
            }
            None => false,
        };
        if evict {
            debug!(key = %key, "evicting entry after last unsubscribe");
            state.slots.remove(&key);
        }
    }

    /// Edit a cached value in place without changing its status.
    ///
    /// Only used for optimistic patches. Returns `None` when the entry has no
    /// value.
    pub fn patch<R>(&self, key: &CacheKey, edit: impl FnOnce(&mut Payload) -> R) -> Option<R> {
        let (result, notification) = {
            let mut state = self.lock();
            let slot = state.slots.get_mut(key)?;
            let value = slot.entry.value.as_mut()?;
            let result = edit(value);
            (result, collect(slot))
        };
        deliver(notification);
        Some(result)
    }

    /// Drop every entry and subscription. Requests dispatched before the
    /// clear are discarded when they settle.
    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.slots.len();
        state.slots.clear();
        state.subscriptions.clear();
        state.invalidations.clear();
        state.epoch += 1;
        debug!(dropped, "cache cleared");
    }
}

fn accepts(state: &StoreState, ticket: &RequestTicket) -> bool {
    if ticket.epoch != state.epoch {
        debug!(key = %ticket.key, "discarding result from before cache clear");
        return false;
    }
    match state.slots.get(&ticket.key) {
        Some(slot) if ticket.seq > slot.applied => true,
        Some(slot) => {
            warn!(
                key = %ticket.key,
                seq = ticket.seq,
                applied = slot.applied,
                "discarding superseded response"
            );
            false
        }
        None => {
            debug!(key = %ticket.key, "discarding result for evicted entry");
            false
        }
    }
}

fn collect(slot: &Slot) -> Notification {
    (slot.listeners.values().cloned().collect(), slot.snapshot())
}

fn deliver((listeners, entry): Notification) {
    for listener in listeners {
        listener(&entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskdeck_core::TagKind;
    use taskdeck_test_utils::ManualClock;

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(ManualClock::fixed()))
    }

    fn key(op: &str, id: &str) -> CacheKey {
        CacheKey::new(op, &json!({ "id": id }))
    }

    fn tags(list: &[Tag]) -> BTreeSet<Tag> {
        list.iter().cloned().collect()
    }

    fn counting_listener() -> (Listener, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (
            Arc::new(move |_: &CacheEntry| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_upsert_fulfills_entry() {
        let store = store();
        let k = key("getProject", "p1");
        let ticket = store.mark_pending(&k);
        assert_eq!(store.read(&k).unwrap().status, EntryStatus::Pending);
        let settled = store.upsert(
            &ticket,
            Payload::new(json!({ "id": "p1" })),
            tags(&[Tag::entity(TagKind::Project, "p1")]),
        );
        assert_eq!(settled, Settlement::Applied);
        let entry = store.read(&k).unwrap();
        assert!(entry.is_fresh());
        assert!(entry.last_updated_at.is_some());
        assert!(!entry.is_fetching);
    }

    #[test]
    fn test_late_response_to_superseded_request_is_discarded() {
        let store = store();
        let k = key("getProject", "p9");
        let a = store.mark_pending(&k);
        let b = store.mark_pending(&k);
        assert_eq!(
            store.upsert(&b, Payload::new(json!("B")), BTreeSet::new()),
            Settlement::Applied
        );
        assert_eq!(
            store.upsert(&a, Payload::new(json!("A")), BTreeSet::new()),
            Settlement::Discarded
        );
        assert_eq!(store.read(&k).unwrap().value.unwrap().data, json!("B"));
    }

    #[test]
    fn test_older_response_arriving_first_is_overwritten() {
        let store = store();
        let k = key("getProject", "p9");
        let a = store.mark_pending(&k);
        let b = store.mark_pending(&k);
        store.upsert(&a, Payload::new(json!("A")), BTreeSet::new());
        assert!(store.read(&k).unwrap().is_fetching);
        store.upsert(&b, Payload::new(json!("B")), BTreeSet::new());
        assert_eq!(store.read(&k).unwrap().value.unwrap().data, json!("B"));
    }

    #[test]
    fn test_rejection_keeps_last_known_value() {
        let store = store();
        let k = key("listTasks", "p1");
        let first = store.mark_pending(&k);
        store.upsert(&first, Payload::new(json!([1, 2])), BTreeSet::new());
        let second = store.mark_pending(&k);
        store.mark_rejected(&second, ApiFailure::transport("offline"));
        let entry = store.read(&k).unwrap();
        assert_eq!(entry.status, EntryStatus::Rejected);
        assert_eq!(entry.value.unwrap().data, json!([1, 2]));
        assert!(entry.error.is_some());
    }

    #[test]
    fn test_invalidate_marks_subscribed_stale_and_evicts_unsubscribed() {
        let store = store();
        let watched = key("getProject", "p1");
        let idle = key("listProjects", "all");
        for k in [&watched, &idle] {
            let t = store.mark_pending(k);
            store.upsert(&t, Payload::new(json!({})), tags(&[Tag::collection(TagKind::Project)]));
        }
        let (listener, calls) = counting_listener();
        store.subscribe(&watched, listener);

        let refetch = store.invalidate(&Tag::collection(TagKind::Project));
        assert_eq!(refetch, vec![watched.clone()]);
        let entry = store.read(&watched).unwrap();
        assert_eq!(entry.status, EntryStatus::Stale);
        assert!(entry.value.is_some());
        assert!(store.read(&idle).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidating_several_tags_refetches_each_key_once() {
        let store = store();
        let k = key("getTask", "t1");
        let t = store.mark_pending(&k);
        store.upsert(
            &t,
            Payload::new(json!({})),
            tags(&[Tag::entity(TagKind::Task, "t1"), Tag::entity(TagKind::Project, "p1")]),
        );
        store.subscribe(&k, Arc::new(|_: &CacheEntry| {}));
        let refetch = store.invalidate_tags(&[
            Tag::entity(TagKind::Task, "t1"),
            Tag::entity(TagKind::Project, "p1"),
        ]);
        assert_eq!(refetch.len(), 1);
    }

    #[test]
    fn test_result_dispatched_before_invalidation_stays_stale() {
        let store = store();
        let k = key("getTask", "t1");
        store.subscribe(&k, Arc::new(|_: &CacheEntry| {}));
        let before = store.mark_pending(&k);
        store.invalidate(&Tag::entity(TagKind::Task, "t1"));
        let settled = store.upsert(
            &before,
            Payload::new(json!({ "status": "todo" })),
            tags(&[Tag::entity(TagKind::Task, "t1")]),
        );
        assert_eq!(settled, Settlement::AppliedStale { subscribed: true });
        assert_eq!(store.read(&k).unwrap().status, EntryStatus::Stale);

        let after = store.mark_pending(&k);
        let settled = store.upsert(
            &after,
            Payload::new(json!({ "status": "done" })),
            tags(&[Tag::entity(TagKind::Task, "t1")]),
        );
        assert_eq!(settled, Settlement::Applied);
        assert_eq!(store.read(&k).unwrap().status, EntryStatus::Fulfilled);
    }

    #[test]
    fn test_last_unsubscribe_evicts_stale_entry_only() {
        let store = store();
        let stale = key("getTask", "t1");
        let fresh = key("getTask", "t2");
        for (k, id) in [(&stale, "t1"), (&fresh, "t2")] {
            let t = store.mark_pending(k);
            store.upsert(&t, Payload::new(json!({})), tags(&[Tag::entity(TagKind::Task, id)]));
        }
        let s1 = store.subscribe(&stale, Arc::new(|_: &CacheEntry| {}));
        let s2 = store.subscribe(&fresh, Arc::new(|_: &CacheEntry| {}));
        store.invalidate(&Tag::entity(TagKind::Task, "t1"));
        store.unsubscribe(s1);
        store.unsubscribe(s2);
        assert!(store.read(&stale).is_none());
        assert!(store.read(&fresh).is_some());
    }

    #[test]
    fn test_clear_discards_in_flight_results() {
        let store = store();
        let k = key("getProfile", "me");
        let ticket = store.mark_pending(&k);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(
            store.upsert(&ticket, Payload::new(json!({})), BTreeSet::new()),
            Settlement::Discarded
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_ticket_joinable_only_while_it_can_still_land() {
        let store = store();
        let k = key("getProfile", "me");
        let first = store.mark_pending(&k);
        assert!(store.is_joinable(&first));

        store.clear();
        assert!(!store.is_joinable(&first));

        let second = store.mark_pending(&k);
        assert!(store.is_joinable(&second));
        store.invalidate(&Tag::collection(TagKind::Profile));
        assert!(!store.is_joinable(&second));

        let third = store.mark_pending(&k);
        assert!(store.is_joinable(&third));
        store.upsert(&third, Payload::new(json!({})), BTreeSet::new());
        assert!(!store.is_joinable(&third));
    }

    #[test]
    fn test_result_for_evicted_entry_never_reaches_its_successor() {
        let store = store();
        let k = key("listProjects", "all");
        let t = store.mark_pending(&k);
        store.upsert(&t, Payload::new(json!(["before"])), tags(&[Tag::collection(TagKind::Project)]));

        let old = store.mark_pending(&k);
        store.invalidate(&Tag::collection(TagKind::Project));
        assert!(store.read(&k).is_none());

        let new = store.mark_pending(&k);
        assert_eq!(
            store.upsert(&old, Payload::new(json!(["before"])), BTreeSet::new()),
            Settlement::Discarded
        );
        assert_eq!(store.read(&k).unwrap().status, EntryStatus::Pending);
        store.upsert(&new, Payload::new(json!(["before", "p1"])), BTreeSet::new());
        assert_eq!(store.read(&k).unwrap().value.unwrap().data, json!(["before", "p1"]));
    }

    #[test]
    fn test_listener_may_reenter_store() {
        let store = store();
        let k = key("getTask", "t1");
        let inner = store.clone();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        store.subscribe(
            &k,
            Arc::new(move |entry: &CacheEntry| {
                let current = inner.read(&entry.key).map(|e| e.status);
                sink.lock().unwrap().push(current);
            }),
        );
        let t = store.mark_pending(&k);
        store.upsert(&t, Payload::new(json!({})), BTreeSet::new());
        let observed = observed.lock().unwrap();
        assert_eq!(
            *observed,
            vec![Some(EntryStatus::Pending), Some(EntryStatus::Fulfilled)]
        );
    }

    #[test]
    fn test_patch_edits_value_without_status_change() {
        let store = store();
        let k = key("listTasks", "p1");
        assert!(store.patch(&k, |_| ()).is_none());
        let t = store.mark_pending(&k);
        store.upsert(&t, Payload::new(json!([{ "id": "t1", "status": "todo" }])), BTreeSet::new());
        store.patch(&k, |payload| payload.data[0]["status"] = json!("done"));
        let entry = store.read(&k).unwrap();
        assert_eq!(entry.status, EntryStatus::Fulfilled);
        assert_eq!(entry.value.unwrap().data[0]["status"], "done");
    }
}
