//! Typed facade over the request executor.
//!
//! One method per catalog operation. Reads go through the cache, writes
//! invalidate the tags their catalog entry declares. `data` is decoded into
//! the domain type; a payload of the wrong shape is a malformed response.

use crate::catalog::ops;
use crate::executor::RequestExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use taskdeck_core::{
    Activity, ActivityStats, ApiFailure, ApiResult, AuthPayload, Comment, CommentId,
    CreateProjectRequest, CreateTaskRequest, CreateUserRequest, DashboardSummary, EntityIdType,
    ListQuery, LoginRequest, PageInfo, Payload, Project, ProjectId, RegisterRequest, Task, TaskId,
    TaskStatus, UpdateProfileRequest, UpdateProjectRequest, UpdateTaskRequest, UpdateUserRequest,
    User, UserId,
};

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: Option<PageInfo>,
}

impl<T> Page<T> {
    /// Uses the total reported with this page, so it can never disagree
    /// with `items`.
    pub fn has_more(&self) -> bool {
        self.page
            .is_some_and(|p| p.offset + (self.items.len() as u64) < p.total)
    }
}

#[derive(Debug, Clone)]
pub struct TaskdeckApi {
    executor: RequestExecutor,
}

impl TaskdeckApi {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    // === Auth ===

    pub async fn login(&self, request: &LoginRequest) -> ApiResult<AuthPayload> {
        self.write(ops::LOGIN, to_args(request)?).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> ApiResult<AuthPayload> {
        self.write(ops::REGISTER, to_args(request)?).await
    }

    pub async fn logout(&self) -> ApiResult<()> {
        self.write_unit(ops::LOGOUT, json!({})).await
    }

    pub async fn get_profile(&self) -> ApiResult<User> {
        self.read(ops::GET_PROFILE, json!({})).await
    }

    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> ApiResult<User> {
        self.write(ops::UPDATE_PROFILE, to_args(request)?).await
    }

    // === Users ===

    pub async fn list_users(&self, query: &ListQuery) -> ApiResult<Page<User>> {
        self.read_page(ops::LIST_USERS, to_args(query)?).await
    }

    pub async fn get_user(&self, id: &UserId) -> ApiResult<User> {
        self.read(ops::GET_USER, json!({ "id": id.as_str() })).await
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> ApiResult<User> {
        self.write(ops::CREATE_USER, to_args(request)?).await
    }

    pub async fn update_user(&self, id: &UserId, request: &UpdateUserRequest) -> ApiResult<User> {
        self.write(ops::UPDATE_USER, with_field(to_args(request)?, "id", id.as_str()))
            .await
    }

    pub async fn delete_user(&self, id: &UserId) -> ApiResult<()> {
        self.write_unit(ops::DELETE_USER, json!({ "id": id.as_str() })).await
    }

    // === Projects ===

    pub async fn list_projects(&self, query: &ListQuery) -> ApiResult<Page<Project>> {
        self.read_page(ops::LIST_PROJECTS, to_args(query)?).await
    }

    pub async fn get_project(&self, id: &ProjectId) -> ApiResult<Project> {
        self.read(ops::GET_PROJECT, json!({ "id": id.as_str() })).await
    }

    pub async fn create_project(&self, request: &CreateProjectRequest) -> ApiResult<Project> {
        self.write(ops::CREATE_PROJECT, to_args(request)?).await
    }

    pub async fn update_project(
        &self,
        id: &ProjectId,
        request: &UpdateProjectRequest,
    ) -> ApiResult<Project> {
        self.write(ops::UPDATE_PROJECT, with_field(to_args(request)?, "id", id.as_str()))
            .await
    }

    pub async fn delete_project(&self, id: &ProjectId) -> ApiResult<()> {
        self.write_unit(ops::DELETE_PROJECT, json!({ "id": id.as_str() })).await
    }

    pub async fn add_project_member(&self, id: &ProjectId, user_id: &UserId) -> ApiResult<Project> {
        self.write(
            ops::ADD_PROJECT_MEMBER,
            json!({ "id": id.as_str(), "userId": user_id.as_str() }),
        )
        .await
    }

    pub async fn remove_project_member(&self, id: &ProjectId, user_id: &UserId) -> ApiResult<()> {
        self.write_unit(
            ops::REMOVE_PROJECT_MEMBER,
            json!({ "id": id.as_str(), "userId": user_id.as_str() }),
        )
        .await
    }

    // === Tasks ===

    pub async fn list_tasks(&self, query: &ListQuery) -> ApiResult<Page<Task>> {
        self.read_page(ops::LIST_TASKS, to_args(query)?).await
    }

    pub async fn get_task(&self, id: &TaskId) -> ApiResult<Task> {
        self.read(ops::GET_TASK, json!({ "id": id.as_str() })).await
    }

    pub async fn create_task(&self, request: &CreateTaskRequest) -> ApiResult<Task> {
        self.write(ops::CREATE_TASK, to_args(request)?).await
    }

    pub async fn update_task(&self, id: &TaskId, request: &UpdateTaskRequest) -> ApiResult<Task> {
        self.write(ops::UPDATE_TASK, with_field(to_args(request)?, "id", id.as_str()))
            .await
    }

    pub async fn delete_task(&self, id: &TaskId) -> ApiResult<()> {
        self.write_unit(ops::DELETE_TASK, json!({ "id": id.as_str() })).await
    }

    /// Non-optimistic status change. `project_id` scopes the board refresh.
    pub async fn update_task_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        project_id: Option<&ProjectId>,
    ) -> ApiResult<Task> {
        let mut args = json!({ "id": id.as_str(), "status": status.as_str() });
        if let Some(project_id) = project_id {
            args = with_field(args, "projectId", project_id.as_str());
        }
        self.write(ops::UPDATE_TASK_STATUS, args).await
    }

    /// `None` unassigns.
    pub async fn assign_task(&self, id: &TaskId, assignee: Option<&UserId>) -> ApiResult<Task> {
        self.write(
            ops::ASSIGN_TASK,
            json!({ "id": id.as_str(), "assigneeId": assignee.map(EntityIdType::as_str) }),
        )
        .await
    }

    // === Comments ===

    pub async fn list_comments(&self, task_id: &TaskId) -> ApiResult<Vec<Comment>> {
        self.read(ops::LIST_COMMENTS, json!({ "taskId": task_id.as_str() }))
            .await
    }

    pub async fn create_comment(&self, task_id: &TaskId, content: &str) -> ApiResult<Comment> {
        self.write(
            ops::CREATE_COMMENT,
            json!({ "taskId": task_id.as_str(), "content": content }),
        )
        .await
    }

    pub async fn update_comment(
        &self,
        id: &CommentId,
        task_id: &TaskId,
        content: &str,
    ) -> ApiResult<Comment> {
        self.write(
            ops::UPDATE_COMMENT,
            json!({ "id": id.as_str(), "taskId": task_id.as_str(), "content": content }),
        )
        .await
    }

    /// `task_id` is needed so views of the owning task refresh.
    pub async fn delete_comment(&self, id: &CommentId, task_id: &TaskId) -> ApiResult<()> {
        self.write_unit(
            ops::DELETE_COMMENT,
            json!({ "id": id.as_str(), "taskId": task_id.as_str() }),
        )
        .await
    }

    // === Activities ===

    pub async fn list_project_activities(
        &self,
        project_id: &ProjectId,
        query: &ListQuery,
    ) -> ApiResult<Page<Activity>> {
        let args = with_field(to_args(query)?, "projectId", project_id.as_str());
        self.read_page(ops::LIST_PROJECT_ACTIVITIES, args).await
    }

    pub async fn list_task_activities(
        &self,
        task_id: &TaskId,
        query: &ListQuery,
    ) -> ApiResult<Page<Activity>> {
        let args = with_field(to_args(query)?, "taskId", task_id.as_str());
        self.read_page(ops::LIST_TASK_ACTIVITIES, args).await
    }

    pub async fn list_user_activities(
        &self,
        user_id: &UserId,
        query: &ListQuery,
    ) -> ApiResult<Page<Activity>> {
        let args = with_field(to_args(query)?, "userId", user_id.as_str());
        self.read_page(ops::LIST_USER_ACTIVITIES, args).await
    }

    pub async fn list_recent_activities(&self, query: &ListQuery) -> ApiResult<Page<Activity>> {
        self.read_page(ops::LIST_RECENT_ACTIVITIES, to_args(query)?).await
    }

    pub async fn get_activity_stats(&self) -> ApiResult<ActivityStats> {
        self.read(ops::GET_ACTIVITY_STATS, json!({})).await
    }

    // === Dashboard ===

    pub async fn get_dashboard(&self) -> ApiResult<DashboardSummary> {
        self.read(ops::GET_DASHBOARD, json!({})).await
    }

    // ------------------------------------------------------------------------

    async fn read<T: DeserializeOwned>(&self, operation: &str, args: Value) -> ApiResult<T> {
        let payload = self.executor.query(operation, args).await?;
        decode(operation, payload.data)
    }

    async fn read_page<T: DeserializeOwned>(&self, operation: &str, args: Value) -> ApiResult<Page<T>> {
        let payload = self.executor.query(operation, args).await?;
        decode_page(operation, payload)
    }

    async fn write<T: DeserializeOwned>(&self, operation: &str, args: Value) -> ApiResult<T> {
        let payload = self.executor.mutate_declared(operation, args).await?;
        decode(operation, payload.data)
    }

    async fn write_unit(&self, operation: &str, args: Value) -> ApiResult<()> {
        self.executor.mutate_declared(operation, args).await.map(drop)
    }
}

fn to_args<T: Serialize>(value: &T) -> ApiResult<Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(Value::Object(fields)),
        Ok(other) => Err(ApiFailure::invalid_request(format!(
            "request arguments must serialize to an object, got {other}"
        ))),
        Err(e) => Err(ApiFailure::invalid_request(e.to_string())),
    }
}

fn with_field(args: Value, field: &str, value: &str) -> Value {
    let mut fields = match args {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    fields.insert(field.to_string(), Value::String(value.to_string()));
    Value::Object(fields)
}

fn decode<T: DeserializeOwned>(operation: &str, data: Value) -> ApiResult<T> {
    serde_json::from_value(data).map_err(|e| ApiFailure::malformed(None, format!("{operation}: {e}")))
}

fn decode_page<T: DeserializeOwned>(operation: &str, payload: Payload) -> ApiResult<Page<T>> {
    Ok(Page {
        items: decode(operation, payload.data)?,
        page: payload.page,
    })
}
