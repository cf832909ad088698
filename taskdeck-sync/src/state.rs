//! Application state: the composition root.
//!
//! Everything is constructed here and handed out by reference; nothing lives
//! at module scope, so tests build as many isolated instances as they need.

use crate::api::TaskdeckApi;
use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::executor::{BearerToken, RequestExecutor};
use crate::notifications::{NotificationBus, NotificationEvent, NotificationMiddleware};
use crate::optimistic::OptimisticEngine;
use crate::pagination::{ActivityFeed, FeedFilter, DEFAULT_PAGE_SIZE};
use crate::persistence::{PersistenceStore, Preferences, Theme};
use crate::session::{LogoutReason, Session, SessionDeps, SessionError, SessionManager};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskdeck_core::{Clock, LoginRequest, RegisterRequest, SystemClock, Transport};
use tokio::sync::broadcast;
use tracing::{info, warn};

// ============================================================================
// PREFERENCES REDUCER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferencesAction {
    SetTheme(Theme),
    ToggleTheme,
    SetSidebarCollapsed(bool),
    ToggleSidebar,
    Reset,
}

/// Pure: the next preferences given an action.
pub fn reduce_preferences(prefs: &Preferences, action: PreferencesAction) -> Preferences {
    let mut next = prefs.clone();
    match action {
        PreferencesAction::SetTheme(theme) => next.theme = theme,
        PreferencesAction::ToggleTheme => {
            next.theme = match prefs.theme {
                Theme::Light => Theme::Dark,
                Theme::Dark => Theme::Light,
            }
        }
        PreferencesAction::SetSidebarCollapsed(collapsed) => next.sidebar_collapsed = collapsed,
        PreferencesAction::ToggleSidebar => next.sidebar_collapsed = !prefs.sidebar_collapsed,
        PreferencesAction::Reset => next = Preferences::default(),
    }
    next
}

// ============================================================================
// APP STATE
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    config: SyncConfig,
    executor: RequestExecutor,
    api: TaskdeckApi,
    notifications: NotificationMiddleware,
    session: SessionManager,
    optimistic: OptimisticEngine,
    persistence: PersistenceStore,
    preferences: Arc<Mutex<Preferences>>,
}

impl AppState {
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SyncConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let store = CacheStore::new(clock.clone());
        let token = BearerToken::default();
        let executor = RequestExecutor::new(
            transport,
            store.clone(),
            token.clone(),
            config.request_timeout(),
        );
        let notifications = NotificationMiddleware::new(
            NotificationBus::new(config.event_channel_capacity),
            config.notifications.clone(),
        );
        let persistence = PersistenceStore::new(config.persistence_dir.clone());
        let session = SessionManager::new(SessionDeps {
            cache: store,
            token,
            persistence: persistence.clone(),
            notifications: notifications.clone(),
            clock,
            event_capacity: config.event_channel_capacity,
            rehydration_grace: config.rehydration_grace(),
        });
        executor.add_observer(Arc::new(notifications.clone()));
        executor.add_observer(Arc::new(session.clone()));

        let preferences = match persistence.load_preferences() {
            Ok(prefs) => prefs.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "Failed to load preferences");
                Preferences::default()
            }
        };

        Self {
            api: TaskdeckApi::new(executor.clone()),
            optimistic: OptimisticEngine::new(executor.clone()),
            config,
            executor,
            notifications,
            session,
            persistence,
            preferences: Arc::new(Mutex::new(preferences)),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn api(&self) -> &TaskdeckApi {
        &self.api
    }

    pub fn store(&self) -> &CacheStore {
        self.executor.store()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn optimistic(&self) -> &OptimisticEngine {
        &self.optimistic
    }

    pub fn notifications(&self) -> &NotificationMiddleware {
        &self.notifications
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.bus().subscribe()
    }

    pub fn activity_feed(&self, filter: FeedFilter) -> ActivityFeed {
        ActivityFeed::new(self.executor.clone(), filter, DEFAULT_PAGE_SIZE)
    }

    /// Load persisted session state. Call once at startup.
    pub fn restore(&self) -> Option<Session> {
        self.session.restore()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        self.session.begin_authentication();
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.api.login(&request).await {
            Ok(auth) => self.session.establish(&auth.token, Some(auth.user)),
            Err(failure) => {
                self.session.authentication_failed();
                Err(failure.into())
            }
        }
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Session, SessionError> {
        self.session.begin_authentication();
        match self.api.register(request).await {
            Ok(auth) => self.session.establish(&auth.token, Some(auth.user)),
            Err(failure) => {
                self.session.authentication_failed();
                Err(failure.into())
            }
        }
    }

    /// Tell the server, then tear down locally whatever it answered.
    pub async fn logout(&self) {
        if self.session.is_authenticated() {
            if let Err(failure) = self.api.logout().await {
                info!(error = %failure, "remote logout failed; clearing local session anyway");
            }
        }
        self.session.logout(LogoutReason::UserInitiated);
    }

    pub fn preferences(&self) -> Preferences {
        self.lock_preferences().clone()
    }

    /// Apply `action` through the reducer and persist the result.
    pub fn dispatch_preferences(&self, action: PreferencesAction) -> Preferences {
        let mut prefs = self.lock_preferences();
        let next = reduce_preferences(&prefs, action);
        if next != *prefs {
            if let Err(err) = self.persistence.save_preferences(&next) {
                warn!(error = %err, "Failed to persist preferences");
            }
            *prefs = next.clone();
        }
        next
    }

    fn lock_preferences(&self) -> MutexGuard<'_, Preferences> {
        self.preferences.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::notifications::{NotificationKind, SESSION_EXPIRED_MESSAGE};
    use crate::session::{SessionEvent, SessionPhase};
    use serde_json::json;
    use taskdeck_core::{HttpMethod, UserRole};
    use taskdeck_test_utils::{
        jwt_with_exp, user_json, ManualClock, MockResponse, MockTransport, BASE_EPOCH_SECS,
    };

    fn app(transport: &Arc<MockTransport>, dir: &tempfile::TempDir) -> AppState {
        AppState::with_clock(
            test_config(dir.path()),
            transport.clone(),
            Arc::new(ManualClock::fixed()),
        )
    }

    fn login_ok(transport: &MockTransport) {
        transport.on(
            HttpMethod::Post,
            "/auth/login",
            MockResponse::ok(json!({
                "token": jwt_with_exp(BASE_EPOCH_SECS + 3_600, "u1", "admin"),
                "user": user_json("u1", UserRole::Admin),
            })),
        );
    }

    #[test]
    fn test_reducer() {
        let prefs = Preferences::default();
        let dark = reduce_preferences(&prefs, PreferencesAction::ToggleTheme);
        assert_eq!(dark.theme, Theme::Dark);
        assert_eq!(prefs.theme, Theme::Light);
        let collapsed = reduce_preferences(&dark, PreferencesAction::ToggleSidebar);
        assert!(collapsed.sidebar_collapsed);
        assert_eq!(reduce_preferences(&collapsed, PreferencesAction::Reset), Preferences::default());
        assert_eq!(
            reduce_preferences(&prefs, PreferencesAction::SetTheme(Theme::Light)),
            prefs
        );
    }

    #[tokio::test]
    async fn test_dispatch_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let state = app(&transport, &dir);
        state.dispatch_preferences(PreferencesAction::SetSidebarCollapsed(true));

        let reopened = app(&transport, &dir);
        assert!(reopened.preferences().sidebar_collapsed);
    }

    #[tokio::test]
    async fn test_login_establishes_and_persists_session() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        login_ok(&transport);
        let state = app(&transport, &dir);
        let mut notices = state.subscribe_notifications();

        let session = state.login("u1@example.com", "secret").await.unwrap();
        assert_eq!(session.role, Some(UserRole::Admin));
        assert_eq!(state.session().phase(), SessionPhase::Authenticated);
        assert!(state.executor().token().get().is_some());

        let persisted = state.persistence.load_session().unwrap().unwrap();
        assert!(persisted.is_authenticated);
        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.kind, NotificationKind::Success);
        assert_eq!(notice.message, "Logged in successfully!");
    }

    #[tokio::test]
    async fn test_bad_credentials_fall_back_to_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.on(
            HttpMethod::Post,
            "/auth/login",
            MockResponse::error(401, "Invalid credentials"),
        );
        let state = app(&transport, &dir);
        let mut notices = state.subscribe_notifications();

        let err = state.login("u1@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, SessionError::Api(_)));
        assert_eq!(state.session().phase(), SessionPhase::Unauthenticated);
        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.kind, NotificationKind::Error);
        assert_eq!(notice.message, "Invalid credentials");
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logout_completes_when_remote_call_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        login_ok(&transport);
        transport
            .on(HttpMethod::Get, "/dashboard", MockResponse::ok(json!({ "totalProjects": 1, "totalTasks": 2 })))
            .on(HttpMethod::Post, "/auth/logout", MockResponse::network_error("offline"));
        let state = app(&transport, &dir);
        state.login("u1@example.com", "secret").await.unwrap();
        state.api().get_dashboard().await.unwrap();
        let mut events = state.session().subscribe();
        let mut notices = state.subscribe_notifications();

        state.logout().await;

        assert_eq!(state.session().phase(), SessionPhase::Unauthenticated);
        assert!(state.store().is_empty());
        assert_eq!(state.persistence.load_session().unwrap(), None);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::UserInitiated
            }
        );
        // logout failures are silent
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unauthorized_read_forces_logout_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        login_ok(&transport);
        transport
            .on(HttpMethod::Post, "/projects", MockResponse::error(401, "jwt expired"))
            .on(HttpMethod::Get, "/projects", MockResponse::error(401, "jwt expired"));
        let state = app(&transport, &dir);
        state.login("u1@example.com", "secret").await.unwrap();
        let mut notices = state.subscribe_notifications();

        let create = taskdeck_core::CreateProjectRequest {
            name: "Apollo".into(),
            description: None,
            status: taskdeck_core::ProjectStatus::Active,
            start_date: None,
            end_date: None,
        };
        assert!(state.api().create_project(&create).await.is_err());
        assert!(state.api().list_projects(&Default::default()).await.is_err());

        assert_eq!(state.session().phase(), SessionPhase::Unauthenticated);
        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.kind, NotificationKind::Warning);
        assert_eq!(notice.message, SESSION_EXPIRED_MESSAGE);
        assert!(notices.try_recv().is_err());
    }
}
