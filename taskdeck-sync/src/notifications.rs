//! Notification middleware.
//!
//! Observes every settled operation and turns it into at most one
//! [`NotificationEvent`], published on a [`NotificationBus`]:
//!
//! | Outcome                         | Notification                              |
//! |---------------------------------|-------------------------------------------|
//! | write succeeded, in table       | success: server message or table default  |
//! | write succeeded, not in table   | none                                      |
//! | failed, silent operation        | none                                      |
//! | failed, 401 (not login/register)| none (session manager handles it)         |
//! | failed, otherwise               | error: [`ApiFailure::user_message`]       |

use crate::catalog::{ops, OperationKind};
use crate::config::NotificationConfig;
use crate::executor::{OperationObserver, Settled};
use serde::Serialize;
use taskdeck_core::{ApiFailure, DurationMs};
use tokio::sync::broadcast;
use tracing::debug;

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub message: String,
    pub duration_ms: DurationMs,
}

/// Default success messages for write operations.
pub fn success_message(operation: &str) -> Option<&'static str> {
    let message = match operation {
        ops::LOGIN => "Logged in successfully!",
        ops::REGISTER => "Account created successfully!",
        ops::LOGOUT => "Logged out successfully!",
        ops::UPDATE_PROFILE => "Profile updated successfully!",
        ops::CREATE_USER => "User created successfully!",
        ops::UPDATE_USER => "User updated successfully!",
        ops::DELETE_USER => "User deleted successfully!",
        ops::CREATE_PROJECT => "Project created successfully!",
        ops::UPDATE_PROJECT => "Project updated successfully!",
        ops::DELETE_PROJECT => "Project deleted successfully!",
        ops::ADD_PROJECT_MEMBER => "Member added successfully!",
        ops::REMOVE_PROJECT_MEMBER => "Member removed successfully!",
        ops::CREATE_TASK => "Task created successfully!",
        ops::UPDATE_TASK => "Task updated successfully!",
        ops::DELETE_TASK => "Task deleted successfully!",
        ops::UPDATE_TASK_STATUS => "Task status updated successfully!",
        ops::ASSIGN_TASK => "Task assigned successfully!",
        ops::CREATE_COMMENT => "Comment added successfully!",
        ops::UPDATE_COMMENT => "Comment updated successfully!",
        ops::DELETE_COMMENT => "Comment deleted successfully!",
        _ => return None,
    };
    Some(message)
}

/// Operations whose failures are never shown.
pub fn is_silent(operation: &str) -> bool {
    matches!(
        operation,
        ops::LOGOUT
            | ops::GET_PROFILE
            | ops::LIST_USERS
            | ops::LIST_PROJECTS
            | ops::LIST_TASKS
            | ops::LIST_COMMENTS
            | ops::LIST_PROJECT_ACTIVITIES
            | ops::LIST_TASK_ACTIVITIES
            | ops::LIST_USER_ACTIVITIES
            | ops::LIST_RECENT_ACTIVITIES
            | ops::GET_ACTIVITY_STATS
            | ops::GET_DASHBOARD
    )
}

/// Operations where a 401 means bad credentials rather than a dead session.
pub fn is_credential_check(operation: &str) -> bool {
    matches!(operation, ops::LOGIN | ops::REGISTER)
}

// ============================================================================
// BUS
// ============================================================================

/// Publish/subscribe channel between the middleware and the display.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Non-blocking. With no subscribers the event is dropped.
    pub fn publish(&self, event: NotificationEvent) {
        let kind = event.kind.as_str();
        match self.tx.send(event) {
            Ok(receivers) => debug!(kind, receivers, "Published notification"),
            Err(_) => debug!(kind, "No receivers for notification"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

#[derive(Clone)]
pub struct NotificationMiddleware {
    bus: NotificationBus,
    durations: NotificationConfig,
}

impl NotificationMiddleware {
    pub fn new(bus: NotificationBus, durations: NotificationConfig) -> Self {
        Self { bus, durations }
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn event(&self, kind: NotificationKind, message: impl Into<String>) -> NotificationEvent {
        let duration_ms = match kind {
            NotificationKind::Success => self.durations.success_ms,
            NotificationKind::Error => self.durations.error_ms,
            NotificationKind::Warning => self.durations.warning_ms,
            NotificationKind::Info => self.durations.info_ms,
        };
        NotificationEvent {
            kind,
            message: message.into(),
            duration_ms,
        }
    }

    pub fn notify(&self, kind: NotificationKind, message: impl Into<String>) {
        self.bus.publish(self.event(kind, message));
    }

    /// The single notice shown when a session is torn down for expiry or 401.
    pub fn session_expired(&self) {
        self.notify(NotificationKind::Warning, SESSION_EXPIRED_MESSAGE);
    }

    /// Pure classification of one settled operation.
    pub fn classify(&self, settled: &Settled<'_>) -> Option<NotificationEvent> {
        match settled.outcome {
            Ok(payload) => {
                if settled.kind != OperationKind::Write {
                    return None;
                }
                let default = success_message(settled.operation)?;
                let message = payload.server_message().unwrap_or(default);
                Some(self.event(NotificationKind::Success, message))
            }
            Err(failure) => self.classify_failure(settled.operation, failure),
        }
    }

    fn classify_failure(&self, operation: &str, failure: &ApiFailure) -> Option<NotificationEvent> {
        if is_silent(operation) {
            debug!(operation, "suppressing failure of silent operation");
            return None;
        }
        if failure.is_unauthorized() && !is_credential_check(operation) {
            return None;
        }
        Some(self.event(NotificationKind::Error, failure.user_message()))
    }
}

impl OperationObserver for NotificationMiddleware {
    fn on_settled(&self, settled: &Settled<'_>) {
        if let Some(event) = self.classify(settled) {
            self.bus.publish(event);
        }
    }
}
