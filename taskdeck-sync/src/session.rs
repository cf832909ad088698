//! Session lifecycle manager.
//!
//! ```text
//! unauthenticated ─▶ authenticating ─▶ authenticated ─┬─▶ expired ───▶ unauthenticated
//!                         │                           └─▶ logged out ─▶ unauthenticated
//!                         └──────── failed ──────────────────────────▶ unauthenticated
//! ```
//!
//! The token payload is decoded without verification to learn its expiry.
//! A one-shot timer owned by the manager forces a logout at that instant; it
//! is aborted on logout and carries a generation so a timer from an earlier
//! session can never end a later one.
//!
//! Teardown always clears the session record, then the cache, then the
//! persisted copy, and only then publishes [`SessionEvent::LoggedOut`].

use crate::cache::CacheStore;
use crate::catalog::ops;
use crate::executor::{BearerToken, OperationObserver, Settled};
use crate::notifications::{is_credential_check, NotificationMiddleware};
use crate::persistence::{PersistedSession, PersistenceError, PersistenceStore};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use taskdeck_core::{ApiFailure, Clock, Timestamp, User, UserId, UserRole};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub role: Option<UserRole>,
    pub expires_at: Timestamp,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// Answer for authentication-dependent decisions such as route redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthGate {
    /// Persisted state is still loading or a login is in flight; decide later.
    Pending,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserInitiated,
    Expired,
    Unauthorized,
    InvalidToken,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::UserInitiated => "user_initiated",
            LogoutReason::Expired => "expired",
            LogoutReason::Unauthorized => "unauthorized",
            LogoutReason::InvalidToken => "invalid_token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { user_id: UserId },
    /// The display should redirect to the login surface.
    LoggedOut { reason: LogoutReason },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session token: {0}")]
    InvalidToken(String),
    #[error("Session token expired at {0}")]
    Expired(Timestamp),
    #[error(transparent)]
    Api(#[from] ApiFailure),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

// ============================================================================
// TOKEN DECODING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(alias = "userId", alias = "id", default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

/// Read the payload segment of a JWT. No signature check.
pub fn decode_claims(token: &str) -> Result<TokenClaims, SessionError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(SessionError::InvalidToken("expected three segments".to_string()));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| SessionError::InvalidToken(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| SessionError::InvalidToken(e.to_string()))
}

fn expiry_instant(claims: &TokenClaims) -> Result<Timestamp, SessionError> {
    Utc.timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| SessionError::InvalidToken(format!("exp out of range: {}", claims.exp)))
}

// ============================================================================
// MANAGER
// ============================================================================

struct ExpiryTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SessionState {
    phase: SessionPhase,
    session: Option<Session>,
    timer: Option<ExpiryTimer>,
    generation: u64,
    rehydrated: bool,
    rehydration_deadline: Instant,
}

struct SessionInner {
    state: Mutex<SessionState>,
    cache: CacheStore,
    token: BearerToken,
    persistence: PersistenceStore,
    notifications: NotificationMiddleware,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionManager")
            .field("phase", &state.phase)
            .field("generation", &state.generation)
            .finish()
    }
}

pub struct SessionDeps {
    pub cache: CacheStore,
    pub token: BearerToken,
    pub persistence: PersistenceStore,
    pub notifications: NotificationMiddleware,
    pub clock: Arc<dyn Clock>,
    pub event_capacity: usize,
    pub rehydration_grace: Duration,
}

impl SessionManager {
    pub fn new(deps: SessionDeps) -> Self {
        let (events, _rx) = broadcast::channel(deps.event_capacity);
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Unauthenticated,
                    session: None,
                    timer: None,
                    generation: 0,
                    rehydrated: false,
                    rehydration_deadline: Instant::now() + deps.rehydration_grace,
                }),
                cache: deps.cache,
                token: deps.token,
                persistence: deps.persistence,
                notifications: deps.notifications,
                clock: deps.clock,
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn current(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }

    pub fn has_expiry_timer(&self) -> bool {
        self.lock().timer.is_some()
    }

    pub fn auth_gate(&self) -> AuthGate {
        let state = self.lock();
        if !state.rehydrated && Instant::now() < state.rehydration_deadline {
            return AuthGate::Pending;
        }
        match state.phase {
            SessionPhase::Authenticated => AuthGate::Authenticated,
            SessionPhase::Authenticating => AuthGate::Pending,
            SessionPhase::Unauthenticated => AuthGate::Unauthenticated,
        }
    }

    /// `unauthenticated → authenticating` while credentials are checked.
    pub fn begin_authentication(&self) {
        let mut state = self.lock();
        if state.phase == SessionPhase::Unauthenticated {
            debug!("authenticating");
            state.phase = SessionPhase::Authenticating;
        }
    }

    /// A credential check failed; back to `unauthenticated`.
    pub fn authentication_failed(&self) {
        let mut state = self.lock();
        if state.phase == SessionPhase::Authenticating {
            info!("authentication failed");
            state.phase = SessionPhase::Unauthenticated;
        }
    }

    /// Adopt a freshly issued token.
    pub fn establish(&self, token: &str, user: Option<User>) -> Result<Session, SessionError> {
        let session = match self.session_from_token(token, user) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "rejecting session token");
                self.teardown(LogoutReason::InvalidToken, false);
                return Err(err);
            }
        };
        let persisted = PersistedSession {
            token: Some(session.token.clone()),
            user: session.user.clone(),
            is_authenticated: true,
        };
        if let Err(err) = self.inner.persistence.save_session(&persisted) {
            warn!(error = %err, "Failed to persist session");
        }
        self.activate(session.clone());
        Ok(session)
    }

    /// Load the persisted session at startup. Ends the rehydration window.
    pub fn restore(&self) -> Option<Session> {
        let persisted = match self.inner.persistence.load_session() {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(error = %err, "Failed to read persisted session");
                None
            }
        };
        let restored = match persisted {
            Some(PersistedSession {
                token: Some(token),
                user,
                is_authenticated: true,
            }) => match self.session_from_token(&token, user) {
                Ok(session) => {
                    info!(user_id = %session.user_id, "restored persisted session");
                    self.activate(session.clone());
                    Some(session)
                }
                Err(err) => {
                    info!(error = %err, "discarding persisted session");
                    self.teardown(LogoutReason::InvalidToken, false);
                    None
                }
            },
            Some(_) => {
                self.teardown(LogoutReason::InvalidToken, false);
                None
            }
            None => None,
        };
        self.lock().rehydrated = true;
        restored
    }

    /// User-initiated or forced teardown. Always completes locally.
    pub fn logout(&self, reason: LogoutReason) {
        let announce = matches!(reason, LogoutReason::Expired | LogoutReason::Unauthorized);
        self.teardown(reason, announce);
    }

    /// Tear down only if a session is active. Returns whether it was.
    pub fn force_logout(&self, reason: LogoutReason) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        self.logout(reason);
        true
    }

    // ------------------------------------------------------------------------

    fn session_from_token(&self, token: &str, user: Option<User>) -> Result<Session, SessionError> {
        let claims = decode_claims(token)?;
        let expires_at = expiry_instant(&claims)?;
        if expires_at <= self.inner.clock.now() {
            return Err(SessionError::Expired(expires_at));
        }
        let user_id = user
            .as_ref()
            .map(|u| u.id.clone())
            .or_else(|| claims.sub.clone().map(UserId::new))
            .ok_or_else(|| SessionError::InvalidToken("no subject".to_string()))?;
        let role = user.as_ref().map(|u| u.role).or_else(|| {
            claims
                .role
                .as_deref()
                .and_then(|r| serde_json::from_value(serde_json::Value::String(r.to_string())).ok())
        });
        Ok(Session {
            token: token.to_string(),
            user_id,
            role,
            expires_at,
            user,
        })
    }

    fn activate(&self, session: Session) {
        let user_id = session.user_id.clone();
        let expires_at = session.expires_at;
        self.inner.token.set(session.token.clone());
        {
            let mut state = self.lock();
            if let Some(old) = state.timer.take() {
                old.handle.abort();
            }
            state.generation += 1;
            state.phase = SessionPhase::Authenticated;
            state.session = Some(session);
            let generation = state.generation;
            state.timer = self.schedule_expiry(generation, expires_at);
        }
        info!(user_id = %user_id, expires_at = %expires_at, "session established");
        let _ = self.inner.events.send(SessionEvent::Authenticated { user_id });
    }

    fn schedule_expiry(&self, generation: u64, expires_at: Timestamp) -> Option<ExpiryTimer> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; session expiry timer not scheduled");
            return None;
        };
        let delay = (expires_at - self.inner.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.on_expiry_timer(generation);
            }
        });
        debug!(generation, delay_ms = delay.as_millis() as u64, "expiry timer scheduled");
        Some(ExpiryTimer { generation, handle })
    }

    fn on_expiry_timer(&self, generation: u64) {
        {
            let mut state = self.lock();
            let current = state.timer.as_ref().map(|t| t.generation);
            if current != Some(generation) || state.phase != SessionPhase::Authenticated {
                debug!(generation, "ignoring timer from an ended session");
                return;
            }
            state.timer = None;
        }
        info!("session expired");
        self.logout(LogoutReason::Expired);
    }

    fn teardown(&self, reason: LogoutReason, announce: bool) {
        let was_authenticated = {
            let mut state = self.lock();
            if let Some(timer) = state.timer.take() {
                timer.handle.abort();
            }
            let was = state.phase == SessionPhase::Authenticated;
            state.session = None;
            state.phase = SessionPhase::Unauthenticated;
            state.generation += 1;
            was
        };
        self.inner.token.clear();
        self.inner.cache.clear();
        if let Err(err) = self.inner.persistence.clear_session() {
            warn!(error = %err, "Failed to clear persisted session");
        }
        if was_authenticated || reason == LogoutReason::UserInitiated {
            info!(reason = reason.as_str(), "logged out");
            if announce && was_authenticated {
                self.inner.notifications.session_expired();
            }
            let _ = self.inner.events.send(SessionEvent::LoggedOut { reason });
        }
    }
}

impl OperationObserver for SessionManager {
    fn on_settled(&self, settled: &Settled<'_>) {
        let Err(failure) = settled.outcome else {
            return;
        };
        if failure.is_unauthorized()
            && !is_credential_check(settled.operation)
            && settled.operation != ops::LOGOUT
            && self.force_logout(LogoutReason::Unauthorized)
        {
            warn!(operation = settled.operation, "401 received; session ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OperationKind;
    use crate::config::test_config;
    use crate::notifications::{NotificationBus, NotificationKind, SESSION_EXPIRED_MESSAGE};
    use serde_json::json;
    use taskdeck_core::{ApiResult, Payload};
    use taskdeck_test_utils::{jwt_with_exp, user, ManualClock, BASE_EPOCH_SECS};

    struct Harness {
        manager: SessionManager,
        cache: CacheStore,
        token: BearerToken,
        persistence: PersistenceStore,
        bus: NotificationBus,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::fixed());
        let cache = CacheStore::new(clock.clone());
        let token = BearerToken::default();
        let persistence = PersistenceStore::new(dir.path());
        let bus = NotificationBus::new(16);
        let manager = SessionManager::new(SessionDeps {
            cache: cache.clone(),
            token: token.clone(),
            persistence: persistence.clone(),
            notifications: NotificationMiddleware::new(bus.clone(), config.notifications),
            clock,
            event_capacity: 16,
            rehydration_grace: Duration::from_millis(300),
        });
        Harness {
            manager,
            cache,
            token,
            persistence,
            bus,
            _dir: dir,
        }
    }

    fn seed_cache(cache: &CacheStore) {
        let key = crate::cache::CacheKey::new(ops::GET_DASHBOARD, &json!({}));
        let ticket = cache.mark_pending(&key);
        cache.upsert(&ticket, Payload::new(json!({})), Default::default());
    }

    #[test]
    fn test_decode_claims_accepts_aliases() {
        let token = jwt_with_exp(BASE_EPOCH_SECS + 60, "u1", "admin");
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert_eq!(claims.exp, BASE_EPOCH_SECS + 60);

        let payload = URL_SAFE_NO_PAD.encode(r#"{"userId":"u2","exp":1}"#);
        let claims = decode_claims(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u2"));

        assert!(decode_claims("not-a-token").is_err());
        assert!(decode_claims("a.%%%.c").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_persisted_token_restores_unauthenticated() {
        let h = harness();
        seed_cache(&h.cache);
        h.persistence
            .save_session(&PersistedSession {
                token: Some(jwt_with_exp(BASE_EPOCH_SECS - 7_200, "u1", "admin")),
                user: Some(user("u1", UserRole::Admin)),
                is_authenticated: true,
            })
            .unwrap();

        assert!(h.manager.restore().is_none());
        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert_eq!(h.manager.auth_gate(), AuthGate::Unauthenticated);
        assert!(!h.manager.has_expiry_timer());
        assert!(h.cache.is_empty());
        assert_eq!(h.persistence.load_session().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_persisted_token_schedules_expiry() {
        let h = harness();
        let mut events = h.manager.subscribe();
        let mut notices = h.bus.subscribe();
        h.persistence
            .save_session(&PersistedSession {
                token: Some(jwt_with_exp(BASE_EPOCH_SECS + 60, "u1", "project_manager")),
                user: None,
                is_authenticated: true,
            })
            .unwrap();

        let session = h.manager.restore().unwrap();
        assert_eq!(session.role, Some(UserRole::ProjectManager));
        assert!(h.manager.has_expiry_timer());
        assert_eq!(h.manager.auth_gate(), AuthGate::Authenticated);
        assert!(h.token.get().is_some());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Authenticated {
                user_id: UserId::new("u1")
            }
        );

        seed_cache(&h.cache);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert!(h.cache.is_empty());
        assert!(h.token.get().is_none());
        assert_eq!(h.persistence.load_session().unwrap(), None);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::Expired
            }
        );
        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.kind, NotificationKind::Warning);
        assert_eq!(notice.message, SESSION_EXPIRED_MESSAGE);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_session_keeps_persisted_user() {
        let h = harness();
        let profile = user("u1", UserRole::Admin);
        h.persistence
            .save_session(&PersistedSession {
                token: Some(jwt_with_exp(BASE_EPOCH_SECS + 600, "u1", "admin")),
                user: Some(profile.clone()),
                is_authenticated: true,
            })
            .unwrap();

        let restored = h.manager.restore().unwrap();
        assert_eq!(restored.user, Some(profile));
        assert_eq!(h.manager.current(), Some(restored));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_timer_of_old_session() {
        let h = harness();
        let mut events = h.manager.subscribe();
        h.manager
            .establish(&jwt_with_exp(BASE_EPOCH_SECS + 30, "u1", "admin"), None)
            .unwrap();
        h.manager.logout(LogoutReason::UserInitiated);
        h.manager
            .establish(&jwt_with_exp(BASE_EPOCH_SECS + 3_600, "u2", "admin"), None)
            .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(h.manager.current().unwrap().user_id, UserId::new("u2"));

        let seen: Vec<SessionEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![
                SessionEvent::Authenticated { user_id: UserId::new("u1") },
                SessionEvent::LoggedOut { reason: LogoutReason::UserInitiated },
                SessionEvent::Authenticated { user_id: UserId::new("u2") },
            ]
        );
    }

    #[tokio::test]
    async fn test_establish_rejects_garbage_token() {
        let h = harness();
        h.manager.begin_authentication();
        assert!(matches!(
            h.manager.establish("garbage", None),
            Err(SessionError::InvalidToken(_))
        ));
        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert!(h.token.get().is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_failure_forces_single_logout() {
        let h = harness();
        let mut notices = h.bus.subscribe();
        let mut events = h.manager.subscribe();
        h.manager
            .establish(&jwt_with_exp(BASE_EPOCH_SECS + 3_600, "u1", "admin"), None)
            .unwrap();
        let _ = events.try_recv();

        let outcome: ApiResult<Payload> = Err(ApiFailure::from_response(401, None));
        for operation in [ops::LIST_TASKS, ops::GET_DASHBOARD] {
            h.manager.on_settled(&Settled {
                operation,
                kind: OperationKind::Read,
                outcome: &outcome,
            });
        }

        assert_eq!(h.manager.phase(), SessionPhase::Unauthenticated);
        assert_eq!(notices.try_recv().unwrap().message, SESSION_EXPIRED_MESSAGE);
        assert!(notices.try_recv().is_err());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::Unauthorized
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_login_does_not_log_out() {
        let h = harness();
        h.manager
            .establish(&jwt_with_exp(BASE_EPOCH_SECS + 3_600, "u1", "admin"), None)
            .unwrap();
        let outcome: ApiResult<Payload> = Err(ApiFailure::from_response(401, None));
        h.manager.on_settled(&Settled {
            operation: ops::LOGIN,
            kind: OperationKind::Write,
            outcome: &outcome,
        });
        assert!(h.manager.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_gate_pending_until_rehydrated() {
        let h = harness();
        assert_eq!(h.manager.auth_gate(), AuthGate::Pending);
        tokio::time::sleep(Duration::from_millis(301)).await;
        assert_eq!(h.manager.auth_gate(), AuthGate::Unauthenticated);

        let h = harness();
        h.manager.restore();
        assert_eq!(h.manager.auth_gate(), AuthGate::Unauthenticated);
        h.manager.begin_authentication();
        assert_eq!(h.manager.auth_gate(), AuthGate::Pending);
        h.manager.authentication_failed();
        assert_eq!(h.manager.auth_gate(), AuthGate::Unauthenticated);
    }
}
