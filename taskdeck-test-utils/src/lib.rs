//! Taskdeck Test Utilities
//!
//! Centralized test infrastructure for the Taskdeck workspace:
//! - Scripted transport with per-route responses, latency and call capture
//! - Manual clock for deterministic session expiry
//! - Entity, envelope and token fixtures
//! - Proptest generators

pub use taskdeck_core::{
    Activity, ActivityEntity, ActivityId, ApiRequest, Clock, HttpMethod, PageInfo, Project,
    ProjectId, ProjectStatus, Tag, TagKind, Task, TaskId, TaskPriority, TaskStatus, Timestamp,
    Transport, TransportError, TransportResponse, User, UserId, UserRole,
};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    body: String,
    delay: Duration,
    network_error: Option<String>,
}

impl MockResponse {
    /// `200` with a success envelope around `data`.
    pub fn ok(data: Value) -> Self {
        Self::json(200, json!({ "success": true, "data": data }))
    }

    /// `200`/`201` style success carrying a server message.
    pub fn ok_with_message(data: Value, message: &str) -> Self {
        Self::json(200, json!({ "success": true, "message": message, "data": data }))
    }

    /// Paginated list envelope.
    pub fn list(items: Value, total: u64, limit: u64, offset: u64) -> Self {
        Self::json(
            200,
            json!({
                "success": true,
                "data": items,
                "total": total,
                "limit": limit,
                "offset": offset
            }),
        )
    }

    /// Error envelope with a server message.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "success": false, "message": message }))
    }

    /// Arbitrary JSON body.
    pub fn json(status: u16, body: Value) -> Self {
        Self::raw(status, body.to_string())
    }

    /// Arbitrary body text, e.g. for malformed envelopes.
    pub fn raw(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: Duration::ZERO,
            network_error: None,
        }
    }

    /// No response at all.
    pub fn network_error(message: &str) -> Self {
        Self {
            status: 0,
            body: String::new(),
            delay: Duration::ZERO,
            network_error: Some(message.to_string()),
        }
    }

    /// Delay the reply by `millis` (tokio time, so paused clocks apply).
    pub fn delayed(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

type RouteKey = (HttpMethod, String);

/// Transport double answering from per-route scripts.
///
/// Responses queued for a route are consumed in order; the last one repeats.
/// Unscripted routes answer `404`.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<RouteKey, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn on(&self, method: HttpMethod, path: &str, response: MockResponse) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: HttpMethod, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_response(&self, method: HttpMethod, path: &str) -> MockResponse {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => MockResponse::error(404, &format!("No route for {} {}", method, path)),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<TransportResponse, TransportError> {
        let response = self.next_response(request.method, &request.path);
        self.calls.lock().unwrap().push(request);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        match response.network_error {
            Some(message) => Err(TransportError::new(message)),
            None => Ok(TransportResponse {
                status: response.status,
                body: response.body,
            }),
        }
    }
}

/// Value of a query parameter on a captured request.
pub fn query_param<'a>(request: &'a ApiRequest, name: &str) -> Option<&'a str> {
    request
        .query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// 2024-01-01 00:00:00 UTC
pub const BASE_EPOCH_SECS: i64 = 1_704_067_200;

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock pinned to [`BASE_EPOCH_SECS`].
    pub fn fixed() -> Self {
        Self::at(base_time())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

pub fn base_time() -> Timestamp {
    Utc.timestamp_opt(BASE_EPOCH_SECS, 0).unwrap()
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn task(id: &str, status: TaskStatus, project_id: &str) -> Task {
    Task {
        id: TaskId::new(id),
        title: format!("Task {id}"),
        description: None,
        status,
        priority: TaskPriority::Medium,
        project_id: ProjectId::new(project_id),
        assignee_id: None,
        due_date: None,
        created_at: None,
        updated_at: None,
    }
}

pub fn task_json(id: &str, status: TaskStatus, project_id: &str) -> Value {
    serde_json::to_value(task(id, status, project_id)).unwrap()
}

pub fn project(id: &str, name: &str) -> Project {
    Project {
        id: ProjectId::new(id),
        name: name.to_string(),
        description: None,
        status: ProjectStatus::Active,
        owner_id: None,
        member_ids: Vec::new(),
        start_date: None,
        end_date: None,
        created_at: None,
        updated_at: None,
    }
}

pub fn project_json(id: &str, name: &str) -> Value {
    serde_json::to_value(project(id, name)).unwrap()
}

pub fn user(id: &str, role: UserRole) -> User {
    User {
        id: UserId::new(id),
        name: format!("User {id}"),
        email: format!("{id}@example.com"),
        role,
        created_at: None,
        updated_at: None,
    }
}

pub fn user_json(id: &str, role: UserRole) -> Value {
    serde_json::to_value(user(id, role)).unwrap()
}

pub fn activity(id: &str, task_id: &str, project_id: &str) -> Activity {
    Activity {
        id: ActivityId::new(id),
        action: "task_updated".to_string(),
        entity_type: ActivityEntity::Task,
        entity_id: task_id.to_string(),
        project_id: Some(ProjectId::new(project_id)),
        task_id: Some(TaskId::new(task_id)),
        user_id: UserId::new("u1"),
        description: None,
        created_at: None,
    }
}

/// `count` activities numbered from `first`, as a JSON array.
pub fn activities_json(first: usize, count: usize, project_id: &str) -> Value {
    let items: Vec<Activity> = (first..first + count)
        .map(|i| activity(&format!("a{i}"), &format!("t{i}"), project_id))
        .collect();
    serde_json::to_value(items).unwrap()
}

/// Unsigned JWT whose payload carries `sub`, `role` and `exp`.
pub fn jwt_with_exp(exp_epoch_secs: i64, user_id: &str, role: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = json!({
        "sub": user_id,
        "role": role,
        "iat": exp_epoch_secs - 3600,
        "exp": exp_epoch_secs
    });
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Todo),
            Just(TaskStatus::InProgress),
            Just(TaskStatus::Review),
            Just(TaskStatus::Done),
        ]
    }

    pub fn arb_tag_kind() -> impl Strategy<Value = TagKind> {
        prop_oneof![
            Just(TagKind::User),
            Just(TagKind::Profile),
            Just(TagKind::Project),
            Just(TagKind::Task),
            Just(TagKind::Comment),
            Just(TagKind::Activity),
            Just(TagKind::Dashboard),
        ]
    }

    pub fn arb_tag() -> impl Strategy<Value = Tag> {
        (arb_tag_kind(), proptest::option::of("[a-z][0-9]{1,2}")).prop_map(|(kind, id)| match id {
            Some(id) => Tag::entity(kind, id),
            None => Tag::collection(kind),
        })
    }

    /// Flat argument objects with scalar and null fields.
    pub fn arb_args() -> impl Strategy<Value = Value> {
        proptest::collection::btree_map(
            "[a-z]{1,6}",
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                (0u32..1000).prop_map(|n| json!(n)),
                "[a-z0-9]{0,6}".prop_map(Value::String),
            ],
            0..6,
        )
        .prop_map(|fields| Value::Object(fields.into_iter().collect()))
    }

    /// A board of tasks with distinct ids.
    pub fn arb_board(max: usize) -> impl Strategy<Value = Vec<Task>> {
        proptest::collection::vec(arb_task_status(), 1..=max).prop_map(|statuses| {
            statuses
                .into_iter()
                .enumerate()
                .map(|(i, status)| task(&format!("t{i}"), status, "p1"))
                .collect()
        })
    }
}
