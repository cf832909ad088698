//! Taskdeck headless sync client.

use std::sync::Arc;
use taskdeck_sync::config::SyncConfig;
use taskdeck_sync::error::SyncError;
use taskdeck_sync::http::HttpTransport;
use taskdeck_sync::session::{LogoutReason, SessionEvent};
use taskdeck_sync::state::AppState;
use taskdeck_sync::telemetry::init_tracing;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let config = SyncConfig::load()?;
    init_tracing(&config.logging)?;
    let transport = HttpTransport::new(&config)?;
    let app = AppState::new(config, Arc::new(transport));

    let mut notices = app.subscribe_notifications();
    let mut session_events = app.session().subscribe();

    if app.restore().is_none() {
        login_from_env(&app).await;
    }

    if app.session().is_authenticated() {
        match app.api().get_dashboard().await {
            Ok(dashboard) => info!(
                projects = dashboard.total_projects,
                tasks = dashboard.total_tasks,
                "Dashboard loaded"
            ),
            Err(err) => warn!(error = %err, "Dashboard prefetch failed"),
        }
    } else {
        info!("No session; waiting for TASKDECK_EMAIL/TASKDECK_PASSWORD or a restart");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(event) => info!(
                    kind = event.kind.as_str(),
                    duration_ms = event.duration_ms,
                    "{}",
                    event.message
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            event = session_events.recv() => match event {
                Ok(SessionEvent::Authenticated { user_id }) => info!(%user_id, "Signed in"),
                Ok(SessionEvent::LoggedOut { reason }) => {
                    if reason != LogoutReason::UserInitiated {
                        warn!(reason = reason.as_str(), "Session ended; exiting");
                    }
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Drain anything published during shutdown.
    while let Ok(event) = notices.try_recv() {
        info!(kind = event.kind.as_str(), "{}", event.message);
    }
    Ok(())
}

async fn login_from_env(app: &AppState) {
    let (Ok(email), Ok(password)) = (
        std::env::var("TASKDECK_EMAIL"),
        std::env::var("TASKDECK_PASSWORD"),
    ) else {
        return;
    };
    if let Err(err) = app.login(&email, &password).await {
        error!(error = %err, "Login failed");
    }
}
