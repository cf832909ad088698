//! Request executor.
//!
//! Bridges the cache and mutation abstractions to the remote API:
//! - reads are served from fresh cache entries or fetched once per key,
//!   concurrent callers sharing the in-flight request
//! - writes always hit the network and invalidate their declared tags on
//!   success, refetching every subscribed entry that provided them
//! - every failure is normalized into an [`ApiFailure`] before it reaches
//!   callers or observers
//!
//! Network work runs on spawned tasks, so a caller that stops waiting never
//! cancels a request; its result still settles into the cache.

use crate::cache::{
    normalize, CacheEntry, CacheKey, CacheStore, Listener, RequestTicket, Settlement, SubscriptionId,
};
use crate::catalog::{Catalog, OperationKind};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use taskdeck_core::{
    new_local_id, ApiFailure, ApiRequest, ApiResult, Envelope, Payload, StatusClass, Tag,
    Transport, TransportResponse,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// BEARER TOKEN
// ============================================================================

/// Token attached to outgoing requests. Written by the session manager.
#[derive(Debug, Clone, Default)]
pub struct BearerToken(Arc<RwLock<Option<String>>>);

impl BearerToken {
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ============================================================================
// OBSERVERS
// ============================================================================

/// Outcome of one dispatched request.
#[derive(Debug)]
pub struct Settled<'a> {
    pub operation: &'a str,
    pub kind: OperationKind,
    pub outcome: &'a ApiResult<Payload>,
}

/// Sees every request the executor dispatches, exactly once, after the cache
/// has been updated.
pub trait OperationObserver: Send + Sync {
    fn on_settled(&self, settled: &Settled<'_>);
}

// ============================================================================
// PENDING MUTATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(new_local_id())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A write from dispatch to settlement.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: MutationId,
    pub operation: String,
    pub args: Value,
    pub tags_to_invalidate: Vec<Tag>,
    /// A local patch is riding on this write.
    pub optimistic: bool,
}

impl PendingMutation {
    pub fn new(operation: impl Into<String>, args: Value) -> Self {
        Self {
            id: MutationId::new(),
            operation: operation.into(),
            args,
            tags_to_invalidate: Vec::new(),
            optimistic: false,
        }
    }

    pub fn invalidating(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags_to_invalidate.extend(tags);
        self
    }

    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

type SharedFetch = Shared<BoxFuture<'static, ApiResult<Payload>>>;

struct InFlight {
    ticket: RequestTicket,
    fetch: SharedFetch,
}

struct Inner {
    transport: Arc<dyn Transport>,
    catalog: Catalog,
    store: CacheStore,
    token: BearerToken,
    timeout: Duration,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    pending: Mutex<BTreeMap<MutationId, PendingMutation>>,
    observers: RwLock<Vec<Arc<dyn OperationObserver>>>,
}

/// Cheap to clone; clones share the same cache and in-flight table.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("store", &self.inner.store)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: CacheStore,
        token: BearerToken,
        timeout: Duration,
    ) -> Self {
        Self::with_catalog(transport, Catalog::standard(), store, token, timeout)
    }

    pub fn with_catalog(
        transport: Arc<dyn Transport>,
        catalog: Catalog,
        store: CacheStore,
        token: BearerToken,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                catalog,
                store,
                token,
                timeout,
                in_flight: Mutex::new(HashMap::new()),
                pending: Mutex::new(BTreeMap::new()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn token(&self) -> &BearerToken {
        &self.inner.token
    }

    pub fn add_observer(&self, observer: Arc<dyn OperationObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Current cache entry for a read, without side effects.
    pub fn peek(&self, operation: &str, args: &Value) -> Option<CacheEntry> {
        self.inner.store.read(&CacheKey::new(operation, args))
    }

    /// Serve a read from cache when fresh, otherwise fetch it.
    ///
    /// Concurrent calls for the same key share one network request.
    pub async fn query(&self, operation: &str, args: Value) -> ApiResult<Payload> {
        let (key, request) = self.prepare_read(operation, &args)?;
        if let Some(value) = self
            .inner
            .store
            .read(&key)
            .filter(CacheEntry::is_fresh)
            .and_then(|entry| entry.value)
        {
            debug!(key = %key, "cache hit");
            return Ok(value);
        }
        self.start_fetch(key, request, false).await
    }

    /// Fetch a read from the network even if a fresh entry exists. Supersedes
    /// any request already in flight for the key.
    pub async fn refresh(&self, operation: &str, args: Value) -> ApiResult<Payload> {
        let (key, request) = self.prepare_read(operation, &args)?;
        self.start_fetch(key, request, true).await
    }

    /// Subscribe to a read and make sure it is loaded.
    ///
    /// The listener sees every transition of the entry until the returned
    /// guard is dropped. Must be called inside a Tokio runtime.
    pub fn watch(&self, operation: &str, args: Value, listener: Listener) -> ApiResult<WatchGuard> {
        let (key, request) = self.prepare_read(operation, &args)?;
        let id = self.inner.store.subscribe(&key, listener);
        let fresh = self.inner.store.read(&key).is_some_and(|e| e.is_fresh());
        if !fresh {
            drop(self.start_fetch(key.clone(), request, false));
        }
        Ok(WatchGuard {
            store: self.inner.store.clone(),
            key,
            id,
        })
    }

    /// Issue a write and invalidate `invalidates` when it succeeds.
    pub async fn mutate(
        &self,
        operation: &str,
        args: Value,
        invalidates: Vec<Tag>,
    ) -> ApiResult<Payload> {
        self.submit(PendingMutation::new(operation, args).invalidating(invalidates))
            .await
    }

    /// Issue a write with the tags its catalog entry declares.
    pub async fn mutate_declared(&self, operation: &str, args: Value) -> ApiResult<Payload> {
        let tags = self
            .inner
            .catalog
            .resolve(operation)?
            .invalidates(&normalize(&args));
        self.mutate(operation, args, tags).await
    }

    /// Dispatch a prepared mutation. It stays in the ledger until it settles.
    pub async fn submit(&self, mutation: PendingMutation) -> ApiResult<Payload> {
        let spec = self.inner.catalog.resolve(&mutation.operation)?;
        if spec.is_read() {
            return Err(ApiFailure::invalid_request(format!(
                "{} is not a write operation",
                spec.name
            )));
        }
        let request = spec.build_request(&mutation.args)?;
        let id = mutation.id;
        debug!(operation = %mutation.operation, mutation = %id, "dispatching mutation");
        self.lock_pending().insert(id, mutation);

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_write(id, request).await });
        handle.await.unwrap_or_else(|e| {
            self.lock_pending().remove(&id);
            Err(ApiFailure::transport(format!("request task failed: {e}")))
        })
    }

    /// Mark every entry providing `tags` stale and refetch the subscribed ones.
    pub fn invalidate(&self, tags: &[Tag]) -> Vec<CacheKey> {
        let keys = self.inner.store.invalidate_tags(tags);
        for key in &keys {
            self.refetch(key.clone());
        }
        if !tags.is_empty() {
            let rendered: Vec<String> = tags.iter().map(Tag::to_string).collect();
            info!(tags = ?rendered, refetched = keys.len(), "tags invalidated");
        }
        keys
    }

    /// Writes dispatched and not yet settled.
    pub fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.lock_pending().values().cloned().collect()
    }

    // ------------------------------------------------------------------------

    fn prepare_read(&self, operation: &str, args: &Value) -> ApiResult<(CacheKey, ApiRequest)> {
        let spec = self.inner.catalog.resolve(operation)?;
        if !spec.is_read() {
            return Err(ApiFailure::invalid_request(format!(
                "{operation} is not a read operation"
            )));
        }
        let key = CacheKey::new(operation, args);
        let request = spec.build_request(key.args())?;
        Ok((key, request))
    }

    /// Start (or join) the network request for `key`. With `supersede` a new
    /// request is always dispatched and replaces any in-flight one.
    ///
    /// An in-flight request is only joined while its result can still land in
    /// the cache and no write has invalidated tags since it was dispatched.
    fn start_fetch(&self, key: CacheKey, request: ApiRequest, supersede: bool) -> SharedFetch {
        let (fetch, deferred) = {
            let mut in_flight = self.lock_in_flight();
            if !supersede {
                if let Some(existing) = in_flight.get(&key) {
                    if self.inner.store.is_joinable(&existing.ticket) {
                        debug!(key = %key, "joining in-flight request");
                        return existing.fetch.clone();
                    }
                    debug!(key = %key, "in-flight request outdated, dispatching anew");
                }
            }
            let (ticket, deferred) = self.inner.store.mark_pending_deferred(&key);
            let tracked = ticket.clone();
            let this = self.clone();
            let handle = tokio::spawn(async move { this.run_read(ticket, request).await });
            let fetch = async move {
                handle
                    .await
                    .unwrap_or_else(|e| Err(ApiFailure::transport(format!("request task failed: {e}"))))
            }
            .boxed()
            .shared();
            in_flight.insert(
                key,
                InFlight {
                    ticket: tracked,
                    fetch: fetch.clone(),
                },
            );
            (fetch, deferred)
        };
        deferred.deliver();
        fetch
    }

    fn refetch(&self, key: CacheKey) {
        let request = self
            .inner
            .catalog
            .resolve(key.operation())
            .and_then(|spec| spec.build_request(key.args()));
        match request {
            Ok(request) => drop(self.start_fetch(key, request, true)),
            Err(failure) => warn!(key = %key, error = %failure, "cannot refetch entry"),
        }
    }

    async fn run_read(self, ticket: RequestTicket, request: ApiRequest) -> ApiResult<Payload> {
        let key = ticket.key().clone();
        let outcome = self.dispatch(request).await;
        let settlement = match &outcome {
            Ok(payload) => {
                let tags = self
                    .inner
                    .catalog
                    .get(key.operation())
                    .map(|spec| spec.provides(key.args(), &payload.data))
                    .unwrap_or_default();
                self.inner.store.upsert(&ticket, payload.clone(), tags)
            }
            Err(failure) => self.inner.store.mark_rejected(&ticket, failure.clone()),
        };

        {
            let mut in_flight = self.lock_in_flight();
            if in_flight
                .get(&key)
                .is_some_and(|f| f.ticket.seq() == ticket.seq())
            {
                in_flight.remove(&key);
            }
        }

        // Invalidated while this request was out and nothing newer is coming.
        if settlement == (Settlement::AppliedStale { subscribed: true })
            && self.inner.store.read(&key).is_some_and(|e| !e.is_fetching)
        {
            self.refetch(key.clone());
        }

        self.notify(key.operation(), OperationKind::Read, &outcome);
        outcome
    }

    async fn run_write(self, id: MutationId, request: ApiRequest) -> ApiResult<Payload> {
        let outcome = self.dispatch(request).await;
        let Some(mutation) = self.lock_pending().remove(&id) else {
            return outcome;
        };
        match &outcome {
            Ok(_) => {
                info!(operation = %mutation.operation, mutation = %id, "mutation confirmed");
                self.invalidate(&mutation.tags_to_invalidate);
            }
            Err(failure) => {
                warn!(
                    operation = %mutation.operation,
                    mutation = %id,
                    status_class = failure.status_class.as_str(),
                    "mutation failed"
                );
            }
        }
        self.notify(&mutation.operation, OperationKind::Write, &outcome);
        outcome
    }

    async fn dispatch(&self, mut request: ApiRequest) -> ApiResult<Payload> {
        request.bearer_token = self.inner.token.get();
        let method = request.method;
        let path = request.path.clone();
        let sent = tokio::time::timeout(self.inner.timeout, self.inner.transport.send(request)).await;
        let outcome = match sent {
            Err(_) => Err(ApiFailure::transport(format!(
                "timeout of {}ms exceeded",
                self.inner.timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(ApiFailure::transport(e.message)),
            Ok(Ok(response)) => decode_response(response),
        };
        if let Err(failure) = &outcome {
            warn!(
                method = %method,
                path = %path,
                status = ?failure.status,
                status_class = failure.status_class.as_str(),
                "request failed"
            );
        }
        outcome
    }

    fn notify(&self, operation: &str, kind: OperationKind, outcome: &ApiResult<Payload>) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let settled = Settled {
            operation,
            kind,
            outcome,
        };
        for observer in observers {
            observer.on_settled(&settled);
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<MutationId, PendingMutation>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unsubscribes its listener when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct WatchGuard {
    store: CacheStore,
    key: CacheKey,
    id: SubscriptionId,
}

impl WatchGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn entry(&self) -> Option<CacheEntry> {
        self.store.read(&self.key)
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

/// Turn a raw response into a payload or a classified failure.
pub fn decode_response(response: TransportResponse) -> ApiResult<Payload> {
    let TransportResponse { status, body } = response;
    let parsed = if body.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Envelope>(&body))
    };

    if StatusClass::from_status(status).is_some() {
        let envelope = parsed.and_then(Result::ok);
        return Err(ApiFailure::from_response(status, envelope.as_ref()));
    }

    match parsed {
        None if status == 204 => Ok(Payload::new(Value::Null)),
        None => Err(ApiFailure::malformed(Some(status), "empty body")),
        Some(Err(e)) => Err(ApiFailure::malformed(Some(status), e.to_string())),
        Some(Ok(envelope)) if !envelope.success => {
            Err(ApiFailure::rejected_envelope(status, &envelope))
        }
        Some(Ok(envelope)) => Ok(Payload::from(envelope)),
    }
}
