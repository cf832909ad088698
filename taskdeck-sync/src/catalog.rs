//! Operation catalog consumed by the request executor.
//!
//! Each operation is `{ name, method, path template, kind, tags }`. For reads
//! the tag function yields the tags the cached result provides; for writes it
//! yields the tags a successful call invalidates. Both receive the request
//! arguments and the response `data`.

use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use taskdeck_core::{ApiFailure, ApiRequest, HttpMethod, Tag, TagKind};

/// Operation names.
pub mod ops {
    pub const LOGIN: &str = "login";
    pub const REGISTER: &str = "register";
    pub const LOGOUT: &str = "logout";
    pub const GET_PROFILE: &str = "getProfile";
    pub const UPDATE_PROFILE: &str = "updateProfile";

    pub const LIST_USERS: &str = "listUsers";
    pub const GET_USER: &str = "getUser";
    pub const CREATE_USER: &str = "createUser";
    pub const UPDATE_USER: &str = "updateUser";
    pub const DELETE_USER: &str = "deleteUser";

    pub const LIST_PROJECTS: &str = "listProjects";
    pub const GET_PROJECT: &str = "getProject";
    pub const CREATE_PROJECT: &str = "createProject";
    pub const UPDATE_PROJECT: &str = "updateProject";
    pub const DELETE_PROJECT: &str = "deleteProject";
    pub const ADD_PROJECT_MEMBER: &str = "addProjectMember";
    pub const REMOVE_PROJECT_MEMBER: &str = "removeProjectMember";

    pub const LIST_TASKS: &str = "listTasks";
    pub const GET_TASK: &str = "getTask";
    pub const CREATE_TASK: &str = "createTask";
    pub const UPDATE_TASK: &str = "updateTask";
    pub const DELETE_TASK: &str = "deleteTask";
    pub const UPDATE_TASK_STATUS: &str = "updateTaskStatus";
    pub const ASSIGN_TASK: &str = "assignTask";

    pub const LIST_COMMENTS: &str = "listComments";
    pub const CREATE_COMMENT: &str = "createComment";
    pub const UPDATE_COMMENT: &str = "updateComment";
    pub const DELETE_COMMENT: &str = "deleteComment";

    pub const LIST_PROJECT_ACTIVITIES: &str = "listProjectActivities";
    pub const LIST_TASK_ACTIVITIES: &str = "listTaskActivities";
    pub const LIST_USER_ACTIVITIES: &str = "listUserActivities";
    pub const LIST_RECENT_ACTIVITIES: &str = "listRecentActivities";
    pub const GET_ACTIVITY_STATS: &str = "getActivityStats";

    pub const GET_DASHBOARD: &str = "getDashboard";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Computes tags from `(args, data)`.
pub type TagFn = fn(&Value, &Value) -> Vec<Tag>;

#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub name: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub kind: OperationKind,
    tags: TagFn,
    /// Argument fields that only feed the tag function and are never sent.
    tag_only: &'static [&'static str],
}

impl OperationSpec {
    pub fn is_read(&self) -> bool {
        self.kind == OperationKind::Read
    }

    fn tag_only(mut self, fields: &'static [&'static str]) -> Self {
        self.tag_only = fields;
        self
    }

    /// Tags attached to the cached result of a read.
    pub fn provides(&self, args: &Value, data: &Value) -> BTreeSet<Tag> {
        match self.kind {
            OperationKind::Read => (self.tags)(args, data).into_iter().collect(),
            OperationKind::Write => BTreeSet::new(),
        }
    }

    /// Tags a successful write invalidates.
    pub fn invalidates(&self, args: &Value) -> Vec<Tag> {
        match self.kind {
            OperationKind::Write => (self.tags)(args, &Value::Null),
            OperationKind::Read => Vec::new(),
        }
    }

    /// Resolve the path template against `args`.
    ///
    /// Placeholders consume their argument and tag-only fields are dropped;
    /// leftovers become the JSON body for POST/PUT/PATCH and the query string
    /// otherwise.
    pub fn build_request(&self, args: &Value) -> Result<ApiRequest, ApiFailure> {
        let mut rest: Map<String, Value> = match args {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ApiFailure::invalid_request(format!(
                    "Arguments for {} must be an object, got {}",
                    self.name, other
                )))
            }
        };

        let mut segments = Vec::new();
        for segment in self.path.split('/') {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(field) => {
                    let value = rest
                        .remove(field)
                        .as_ref()
                        .and_then(scalar_string)
                        .ok_or_else(|| {
                            ApiFailure::invalid_request(format!(
                                "Missing path parameter `{}` for {}",
                                field, self.name
                            ))
                        })?;
                    segments.push(value);
                }
                None => segments.push(segment.to_string()),
            }
        }

        for field in self.tag_only {
            rest.remove(*field);
        }

        let mut request = ApiRequest::new(self.method, segments.join("/"));
        if self.method.has_body() {
            if !rest.is_empty() {
                request.body = Some(Value::Object(rest));
            }
        } else {
            request.query = rest
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let value = scalar_string(&v).unwrap_or_else(|| v.to_string());
                    (k, value)
                })
                .collect();
        }
        Ok(request)
    }
}

pub struct Catalog {
    operations: HashMap<&'static str, OperationSpec>,
}

impl Catalog {
    pub fn new(operations: impl IntoIterator<Item = OperationSpec>) -> Self {
        Self {
            operations: operations.into_iter().map(|op| (op.name, op)).collect(),
        }
    }

    /// The full Taskdeck API.
    pub fn standard() -> Self {
        use ops::*;
        use HttpMethod::{Delete, Get, Patch, Post, Put};
        Self::new([
            write(LOGIN, Post, "/auth/login", no_tags),
            write(REGISTER, Post, "/auth/register", no_tags),
            write(LOGOUT, Post, "/auth/logout", no_tags),
            read(GET_PROFILE, Get, "/auth/profile", |_, _| vec![collection(TagKind::Profile)]),
            write(UPDATE_PROFILE, Put, "/auth/profile", |_, _| {
                vec![collection(TagKind::Profile), collection(TagKind::User)]
            }),
            // Users
            read(LIST_USERS, Get, "/users", |_, data| list_tags(TagKind::User, data)),
            read(GET_USER, Get, "/users/{id}", |args, _| arg_tag(TagKind::User, args, "id")),
            write(CREATE_USER, Post, "/users", |_, _| vec![collection(TagKind::User)]),
            write(UPDATE_USER, Put, "/users/{id}", |args, _| arg_tag(TagKind::User, args, "id")),
            write(DELETE_USER, Delete, "/users/{id}", |args, _| {
                with(collection(TagKind::User), arg_tag(TagKind::User, args, "id"))
            }),
            // Projects
            read(LIST_PROJECTS, Get, "/projects", |_, data| list_tags(TagKind::Project, data)),
            read(GET_PROJECT, Get, "/projects/{id}", |args, _| {
                arg_tag(TagKind::Project, args, "id")
            }),
            write(CREATE_PROJECT, Post, "/projects", |_, _| {
                vec![
                    collection(TagKind::Project),
                    collection(TagKind::Dashboard),
                    collection(TagKind::Activity),
                ]
            }),
            write(UPDATE_PROJECT, Put, "/projects/{id}", |args, _| {
                with(collection(TagKind::Activity), arg_tag(TagKind::Project, args, "id"))
            }),
            write(DELETE_PROJECT, Delete, "/projects/{id}", |args, _| {
                let mut tags = vec![
                    collection(TagKind::Project),
                    collection(TagKind::Task),
                    collection(TagKind::Dashboard),
                    collection(TagKind::Activity),
                ];
                tags.extend(arg_tag(TagKind::Project, args, "id"));
                tags
            }),
            write(ADD_PROJECT_MEMBER, Post, "/projects/{id}/members", |args, _| {
                with(collection(TagKind::Activity), arg_tag(TagKind::Project, args, "id"))
            }),
            write(
                REMOVE_PROJECT_MEMBER,
                Delete,
                "/projects/{id}/members/{userId}",
                |args, _| with(collection(TagKind::Activity), arg_tag(TagKind::Project, args, "id")),
            ),
            // Tasks
            read(LIST_TASKS, Get, "/tasks", |args, data| {
                let mut tags = list_tags(TagKind::Task, data);
                tags.extend(arg_tag(TagKind::Project, args, "projectId"));
                tags
            }),
            read(GET_TASK, Get, "/tasks/{id}", |args, _| arg_tag(TagKind::Task, args, "id")),
            write(CREATE_TASK, Post, "/tasks", |args, _| {
                let mut tags = vec![
                    collection(TagKind::Task),
                    collection(TagKind::Dashboard),
                    collection(TagKind::Activity),
                ];
                tags.extend(arg_tag(TagKind::Project, args, "projectId"));
                tags
            }),
            write(UPDATE_TASK, Put, "/tasks/{id}", |args, _| {
                with(collection(TagKind::Activity), arg_tag(TagKind::Task, args, "id"))
            }),
            write(DELETE_TASK, Delete, "/tasks/{id}", |args, _| {
                let mut tags = vec![
                    collection(TagKind::Task),
                    collection(TagKind::Dashboard),
                    collection(TagKind::Activity),
                ];
                tags.extend(arg_tag(TagKind::Task, args, "id"));
                tags
            }),
            write(UPDATE_TASK_STATUS, Patch, "/tasks/{id}/status", |args, _| {
                let mut tags = arg_tag(TagKind::Task, args, "id");
                tags.extend(arg_tag(TagKind::Project, args, "projectId"));
                tags.push(collection(TagKind::Dashboard));
                tags.push(collection(TagKind::Activity));
                tags
            })
            .tag_only(&["projectId"]),
            write(ASSIGN_TASK, Patch, "/tasks/{id}/assign", |args, _| {
                with(collection(TagKind::Activity), arg_tag(TagKind::Task, args, "id"))
            }),
            // Comments
            read(LIST_COMMENTS, Get, "/tasks/{taskId}/comments", |args, data| {
                let mut tags = list_tags(TagKind::Comment, data);
                tags.extend(arg_tag(TagKind::Task, args, "taskId"));
                tags
            }),
            write(CREATE_COMMENT, Post, "/comments", |args, _| {
                let mut tags = vec![collection(TagKind::Comment), collection(TagKind::Activity)];
                tags.extend(arg_tag(TagKind::Task, args, "taskId"));
                tags
            }),
            write(UPDATE_COMMENT, Put, "/comments/{id}", |args, _| {
                with(collection(TagKind::Comment), arg_tag(TagKind::Task, args, "taskId"))
            })
            .tag_only(&["taskId"]),
            write(DELETE_COMMENT, Delete, "/comments/{id}", |args, _| {
                with(collection(TagKind::Comment), arg_tag(TagKind::Task, args, "taskId"))
            })
            .tag_only(&["taskId"]),
            // Activities
            read(
                LIST_PROJECT_ACTIVITIES,
                Get,
                "/activities/project/{projectId}",
                |args, _| with(collection(TagKind::Activity), arg_tag(TagKind::Project, args, "projectId")),
            ),
            read(LIST_TASK_ACTIVITIES, Get, "/activities/task/{taskId}", |args, _| {
                with(collection(TagKind::Activity), arg_tag(TagKind::Task, args, "taskId"))
            }),
            read(LIST_USER_ACTIVITIES, Get, "/activities/user/{userId}", |args, _| {
                with(collection(TagKind::Activity), arg_tag(TagKind::User, args, "userId"))
            }),
            read(LIST_RECENT_ACTIVITIES, Get, "/activities/recent", |_, _| {
                vec![collection(TagKind::Activity)]
            }),
            read(GET_ACTIVITY_STATS, Get, "/activities/stats", |_, _| {
                vec![collection(TagKind::Activity)]
            }),
            // Dashboard
            read(GET_DASHBOARD, Get, "/dashboard", |_, _| {
                vec![
                    collection(TagKind::Dashboard),
                    collection(TagKind::Project),
                    collection(TagKind::Task),
                ]
            }),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.get(name)
    }

    /// Like [`get`](Self::get), but unknown names are an invalid request.
    pub fn resolve(&self, name: &str) -> Result<&OperationSpec, ApiFailure> {
        self.get(name)
            .ok_or_else(|| ApiFailure::invalid_request(format!("Unknown operation: {name}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationSpec> {
        self.operations.values()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// TABLE HELPERS
// ============================================================================

fn read(name: &'static str, method: HttpMethod, path: &'static str, tags: TagFn) -> OperationSpec {
    OperationSpec {
        name,
        method,
        path,
        kind: OperationKind::Read,
        tags,
        tag_only: &[],
    }
}

fn write(name: &'static str, method: HttpMethod, path: &'static str, tags: TagFn) -> OperationSpec {
    OperationSpec {
        name,
        method,
        path,
        kind: OperationKind::Write,
        tags,
        tag_only: &[],
    }
}

fn no_tags(_: &Value, _: &Value) -> Vec<Tag> {
    Vec::new()
}

fn collection(kind: TagKind) -> Tag {
    Tag::collection(kind)
}

fn with(first: Tag, rest: Vec<Tag>) -> Vec<Tag> {
    let mut tags = vec![first];
    tags.extend(rest);
    tags
}

/// Entity tag for `args[field]`, if present.
fn arg_tag(kind: TagKind, args: &Value, field: &str) -> Vec<Tag> {
    args.get(field)
        .and_then(scalar_string)
        .map(|id| Tag::entity(kind, id))
        .into_iter()
        .collect()
}

/// Collection tag plus one entity tag per list item carrying an `id`.
fn list_tags(kind: TagKind, data: &Value) -> Vec<Tag> {
    let mut tags = vec![Tag::collection(kind)];
    if let Some(items) = data.as_array() {
        tags.extend(
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(scalar_string))
                .map(|id| Tag::entity(kind, id)),
        );
    }
    tags
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_operation_is_registered_once() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.iter().count(), 34);
        assert!(catalog.get(ops::UPDATE_TASK_STATUS).is_some());
        assert!(catalog.resolve("dropTables").is_err());
    }

    #[test]
    fn test_path_placeholders_and_body() {
        let catalog = Catalog::standard();
        let op = catalog.get(ops::UPDATE_TASK_STATUS).unwrap();
        let request = op
            .build_request(&json!({ "id": "t1", "projectId": "p1", "status": "done" }))
            .unwrap();
        assert_eq!(request.method, HttpMethod::Patch);
        assert_eq!(request.path, "/tasks/t1/status");
        assert_eq!(request.body, Some(json!({ "status": "done" })));
        assert!(request.query.is_empty());
    }

    #[test]
    fn test_tag_only_fields_stay_off_the_wire() {
        let catalog = Catalog::standard();
        let args = json!({ "id": "c1", "taskId": "t7", "content": "edited" });

        let delete = catalog.get(ops::DELETE_COMMENT).unwrap();
        let request = delete.build_request(&args).unwrap();
        assert_eq!(request.path, "/comments/c1");
        assert!(request.query.iter().all(|(k, _)| k != "taskId"));
        assert_eq!(
            delete.invalidates(&args),
            vec![Tag::collection(TagKind::Comment), Tag::entity(TagKind::Task, "t7")]
        );

        let update = catalog.get(ops::UPDATE_COMMENT).unwrap();
        let request = update.build_request(&args).unwrap();
        assert_eq!(request.body, Some(json!({ "content": "edited" })));

        let create = catalog.get(ops::CREATE_COMMENT).unwrap();
        let request = create.build_request(&args).unwrap();
        assert_eq!(request.body.unwrap()["taskId"], "t7");
    }

    #[test]
    fn test_read_leftovers_become_query() {
        let catalog = Catalog::standard();
        let op = catalog.get(ops::LIST_TASKS).unwrap();
        let request = op
            .build_request(&json!({ "projectId": "p1", "limit": 20 }))
            .unwrap();
        assert_eq!(request.path, "/tasks");
        assert_eq!(request.body, None);
        assert_eq!(
            request.query,
            vec![
                ("limit".to_string(), "20".to_string()),
                ("projectId".to_string(), "p1".to_string())
            ]
        );
    }

    #[test]
    fn test_missing_placeholder_is_rejected() {
        let catalog = Catalog::standard();
        let op = catalog.get(ops::GET_PROJECT).unwrap();
        assert!(op.build_request(&json!({})).is_err());
        assert!(op.build_request(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_list_provides_item_tags() {
        let catalog = Catalog::standard();
        let op = catalog.get(ops::LIST_TASKS).unwrap();
        let provided = op.provides(
            &json!({ "projectId": "p1" }),
            &json!([{ "id": "t1" }, { "id": "t2" }]),
        );
        assert!(provided.contains(&Tag::collection(TagKind::Task)));
        assert!(provided.contains(&Tag::entity(TagKind::Task, "t1")));
        assert!(provided.contains(&Tag::entity(TagKind::Task, "t2")));
        assert!(provided.contains(&Tag::entity(TagKind::Project, "p1")));
    }

    #[test]
    fn test_delete_comment_invalidates_parent_task() {
        let catalog = Catalog::standard();
        let op = catalog.get(ops::DELETE_COMMENT).unwrap();
        let tags = op.invalidates(&json!({ "id": "c1", "taskId": "t7" }));
        assert_eq!(
            tags,
            vec![Tag::collection(TagKind::Comment), Tag::entity(TagKind::Task, "t7")]
        );
    }

    #[test]
    fn test_status_change_invalidates_task_and_project() {
        let catalog = Catalog::standard();
        let op = catalog.get(ops::UPDATE_TASK_STATUS).unwrap();
        let tags = op.invalidates(&json!({ "id": "t1", "projectId": "p1", "status": "done" }));
        assert!(tags.contains(&Tag::entity(TagKind::Task, "t1")));
        assert!(tags.contains(&Tag::entity(TagKind::Project, "p1")));
    }
}
