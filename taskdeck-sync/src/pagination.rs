//! Paginated activity feed.
//!
//! Pages accumulate into one list per generation. A filter change or refresh
//! starts a new generation; a page that comes back for an older generation is
//! dropped, and `has_more` only ever compares against the `total` reported
//! for the generation the accumulated items belong to.

use crate::catalog::ops;
use crate::executor::RequestExecutor;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskdeck_core::{Activity, ApiFailure, ApiResult, EntityIdType, Payload, ProjectId, TaskId, UserId};
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Which activity list the feed pages through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FeedSource {
    #[default]
    Recent,
    Project(ProjectId),
    Task(TaskId),
    User(UserId),
}

impl FeedSource {
    pub fn operation(&self) -> &'static str {
        match self {
            FeedSource::Recent => ops::LIST_RECENT_ACTIVITIES,
            FeedSource::Project(_) => ops::LIST_PROJECT_ACTIVITIES,
            FeedSource::Task(_) => ops::LIST_TASK_ACTIVITIES,
            FeedSource::User(_) => ops::LIST_USER_ACTIVITIES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub source: FeedSource,
    /// Restrict to one action, e.g. `task_updated`.
    pub action: Option<String>,
}

impl FeedFilter {
    pub fn new(source: FeedSource) -> Self {
        Self {
            source,
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    fn page_args(&self, limit: u64, offset: u64) -> Value {
        let mut args = Map::new();
        match &self.source {
            FeedSource::Recent => {}
            FeedSource::Project(id) => {
                args.insert("projectId".into(), json!(id.as_str()));
            }
            FeedSource::Task(id) => {
                args.insert("taskId".into(), json!(id.as_str()));
            }
            FeedSource::User(id) => {
                args.insert("userId".into(), json!(id.as_str()));
            }
        }
        if let Some(action) = &self.action {
            args.insert("action".into(), json!(action));
        }
        args.insert("limit".into(), json!(limit));
        args.insert("offset".into(), json!(offset));
        Value::Object(args)
    }
}

/// Result of one `load_more` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedLoad {
    Appended { count: usize },
    /// Nothing left to load; no request was made.
    Exhausted,
    /// A page for this generation is already loading.
    Busy,
    /// The filter changed or the feed was refreshed while the page loaded.
    Discarded,
}

#[derive(Debug, Default)]
struct FeedState {
    filter: FeedFilter,
    generation: u64,
    items: Vec<Activity>,
    total: Option<u64>,
    short_page_seen: bool,
    loading: bool,
}

impl FeedState {
    fn has_more(&self) -> bool {
        match self.total {
            Some(total) => (self.items.len() as u64) < total,
            None => !self.short_page_seen,
        }
    }

    fn reset(&mut self) -> u64 {
        self.generation += 1;
        self.items.clear();
        self.total = None;
        self.short_page_seen = false;
        self.loading = false;
        self.generation
    }
}

struct Ticket {
    generation: u64,
    operation: &'static str,
    args: Value,
}

/// Cheap to clone; clones share the accumulated list.
#[derive(Clone)]
pub struct ActivityFeed {
    executor: RequestExecutor,
    page_size: u64,
    state: Arc<Mutex<FeedState>>,
}

impl ActivityFeed {
    pub fn new(executor: RequestExecutor, filter: FeedFilter, page_size: u64) -> Self {
        Self {
            executor,
            page_size: page_size.max(1),
            state: Arc::new(Mutex::new(FeedState {
                filter,
                ..FeedState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn items(&self) -> Vec<Activity> {
        self.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn total(&self) -> Option<u64> {
        self.lock().total
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn filter(&self) -> FeedFilter {
        self.lock().filter.clone()
    }

    /// Replace the filter and drop everything loaded so far.
    pub fn set_filter(&self, filter: FeedFilter) {
        let mut state = self.lock();
        state.filter = filter;
        let generation = state.reset();
        debug!(generation, "activity feed filter changed");
    }

    /// Load the next page of the current generation.
    pub async fn load_more(&self) -> ApiResult<FeedLoad> {
        let Some(ticket) = self.reserve() else {
            return Ok(self.idle_reason());
        };
        let outcome = self.executor.query(ticket.operation, ticket.args).await;
        self.settle(ticket.generation, outcome)
    }

    /// Start a new generation and load its first page from the network.
    pub async fn refresh(&self) -> ApiResult<FeedLoad> {
        let ticket = {
            let mut state = self.lock();
            state.reset();
            self.ticket(&mut state)
        };
        let outcome = self.executor.refresh(ticket.operation, ticket.args).await;
        self.settle(ticket.generation, outcome)
    }

    fn idle_reason(&self) -> FeedLoad {
        if self.lock().loading {
            FeedLoad::Busy
        } else {
            FeedLoad::Exhausted
        }
    }

    fn reserve(&self) -> Option<Ticket> {
        let mut state = self.lock();
        if state.loading || !state.has_more() {
            return None;
        }
        Some(self.ticket(&mut state))
    }

    fn ticket(&self, state: &mut FeedState) -> Ticket {
        state.loading = true;
        let offset = state.items.len() as u64;
        Ticket {
            generation: state.generation,
            operation: state.filter.source.operation(),
            args: state.filter.page_args(self.page_size, offset),
        }
    }

    fn settle(&self, generation: u64, outcome: ApiResult<Payload>) -> ApiResult<FeedLoad> {
        let decoded = outcome.and_then(|payload| {
            let page = payload.page;
            serde_json::from_value::<Vec<Activity>>(payload.data)
                .map(|items| (items, page))
                .map_err(|e| ApiFailure::malformed(None, format!("activity page: {e}")))
        });

        let mut state = self.lock();
        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "discarding activity page from superseded generation"
            );
            return Ok(FeedLoad::Discarded);
        }
        state.loading = false;
        let (items, page) = decoded?;
        let count = items.len();
        if (count as u64) < self.page_size {
            state.short_page_seen = true;
        }
        if let Some(page) = page {
            state.total = Some(page.total);
        }
        state.items.extend(items);
        debug!(
            generation,
            count,
            loaded = state.items.len(),
            total = ?state.total,
            "activity page appended"
        );
        Ok(FeedLoad::Appended { count })
    }
}
