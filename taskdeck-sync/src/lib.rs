//! Taskdeck client-side synchronization layer.
//!
//! A tagged response cache, the request executor that fills it, optimistic
//! board updates, notification middleware and the session lifecycle, wired
//! together by [`AppState`].

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod notifications;
pub mod optimistic;
pub mod pagination;
pub mod persistence;
pub mod session;
pub mod state;
pub mod telemetry;

pub use api::{Page, TaskdeckApi};
pub use cache::{CacheEntry, CacheKey, CacheStore, EntryStatus};
pub use catalog::{ops, Catalog, OperationKind, OperationSpec};
pub use config::SyncConfig;
pub use error::SyncError;
pub use executor::{BearerToken, MutationId, OperationObserver, RequestExecutor, Settled};
pub use http::HttpTransport;
pub use notifications::{NotificationBus, NotificationEvent, NotificationKind, NotificationMiddleware};
pub use optimistic::{DropOutcome, DropPosition, OptimisticEngine};
pub use pagination::{ActivityFeed, FeedFilter, FeedSource};
pub use persistence::{PersistenceStore, Preferences, Theme};
pub use session::{AuthGate, LogoutReason, Session, SessionEvent, SessionManager, SessionPhase};
pub use state::{reduce_preferences, AppState, PreferencesAction};
