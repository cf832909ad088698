//! Optimistic update engine for drag-and-drop status changes.
//!
//! ```text
//! idle ──begin_drag──▶ dragging ──release──┬─▶ cancelled ─────────────▶ idle
//!                                          ├─▶ same position / status ─▶ idle
//!                                          └─▶ optimistic-applied ─┬─▶ confirmed ─▶ idle
//!                                                                  └─▶ reverted ──▶ idle
//! ```
//!
//! The board is the cached `listTasks` payload for one project; a column is the
//! ordered subsequence of tasks with one status. A patch is applied to the
//! cached value before the status mutation is dispatched, kept in a ledger
//! keyed by mutation id, and removed from that ledger exactly once: dropped on
//! success, reverted on failure.

use crate::cache::{CacheKey, CacheStore};
use crate::catalog::ops;
use crate::executor::{MutationId, PendingMutation, RequestExecutor};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskdeck_core::{ApiFailure, EntityIdType, Payload, ProjectId, TaskId, TaskStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Column id → status.
pub const BOARD_COLUMNS: [(&str, TaskStatus); 4] = [
    ("todo", TaskStatus::Todo),
    ("in-progress", TaskStatus::InProgress),
    ("review", TaskStatus::Review),
    ("done", TaskStatus::Done),
];

pub fn column_status(column: &str) -> Option<TaskStatus> {
    BOARD_COLUMNS
        .iter()
        .find(|(id, _)| *id == column)
        .map(|(_, status)| *status)
}

pub fn status_column(status: TaskStatus) -> &'static str {
    BOARD_COLUMNS
        .iter()
        .find(|(_, s)| *s == status)
        .map(|(id, _)| *id)
        .unwrap_or("todo")
}

/// Cache key of a project's board.
pub fn board_key(project_id: &ProjectId) -> CacheKey {
    CacheKey::new(ops::LIST_TASKS, &json!({ "projectId": project_id.as_str() }))
}

/// A slot on the board: column id plus index within that column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DropPosition {
    pub column: String,
    pub index: usize,
}

impl DropPosition {
    pub fn new(column: impl Into<String>, index: usize) -> Self {
        Self {
            column: column.into(),
            index,
        }
    }
}

// ============================================================================
// BOARD HELPERS
// ============================================================================

fn item_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

fn item_status(item: &Value) -> Option<TaskStatus> {
    item.get("status").and_then(Value::as_str).and_then(TaskStatus::parse)
}

/// Where `task_id` sits on the board.
pub fn locate(items: &[Value], task_id: &TaskId) -> Option<(usize, DropPosition)> {
    let flat = items
        .iter()
        .position(|item| item_id(item) == Some(task_id.as_str()))?;
    let status = item_status(&items[flat])?;
    let index = items[..flat]
        .iter()
        .filter(|item| item_status(item) == Some(status))
        .count();
    Some((flat, DropPosition::new(status_column(status), index)))
}

/// Task ids of one column, in board order.
pub fn column_ids(items: &[Value], status: TaskStatus) -> Vec<String> {
    items
        .iter()
        .filter(|item| item_status(item) == Some(status))
        .filter_map(|item| item_id(item).map(str::to_string))
        .collect()
}

/// Flat index at which an item lands to become the `index`-th of `status`.
fn insertion_point(items: &[Value], status: TaskStatus, index: usize) -> usize {
    let mut seen = 0;
    let mut last_in_column = None;
    for (flat, item) in items.iter().enumerate() {
        if item_status(item) == Some(status) {
            if seen == index {
                return flat;
            }
            seen += 1;
            last_in_column = Some(flat);
        }
    }
    last_in_column.map(|flat| flat + 1).unwrap_or(items.len())
}

// ============================================================================
// PATCHES
// ============================================================================

/// Reversible edit of one cached value.
pub trait OptimisticPatch: Send + Sync + fmt::Debug {
    fn key(&self) -> &CacheKey;

    /// Edit the value in place. Returns `false` when nothing could be applied.
    fn apply(&mut self, value: &mut Payload) -> bool;

    /// Undo [`apply`](Self::apply).
    fn revert(&self, value: &mut Payload);
}

/// Moves one task to another column of its board.
#[derive(Debug, Clone)]
pub struct TaskStatusPatch {
    board: CacheKey,
    task_id: TaskId,
    target: DropPosition,
    to: TaskStatus,
    /// `(flat index, status)` before the move, recorded by `apply`.
    original: Option<(usize, TaskStatus)>,
}

impl TaskStatusPatch {
    pub fn new(board: CacheKey, task_id: TaskId, target: DropPosition, to: TaskStatus) -> Self {
        Self {
            board,
            task_id,
            target,
            to,
            original: None,
        }
    }
}

impl OptimisticPatch for TaskStatusPatch {
    fn key(&self) -> &CacheKey {
        &self.board
    }

    fn apply(&mut self, value: &mut Payload) -> bool {
        let Some(items) = value.data.as_array_mut() else {
            return false;
        };
        let Some((flat, _)) = locate(items, &self.task_id) else {
            return false;
        };
        let Some(from) = item_status(&items[flat]) else {
            return false;
        };
        let mut item = items.remove(flat);
        item["status"] = json!(self.to.as_str());
        let at = insertion_point(items, self.to, self.target.index);
        items.insert(at, item);
        self.original = Some((flat, from));
        true
    }

    fn revert(&self, value: &mut Payload) {
        let Some((flat, from)) = self.original else {
            return;
        };
        let Some(items) = value.data.as_array_mut() else {
            return;
        };
        let Some((current, _)) = locate(items, &self.task_id) else {
            return;
        };
        let mut item = items.remove(current);
        item["status"] = json!(from.as_str());
        items.insert(flat.min(items.len()), item);
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DragError {
    #[error("A drag gesture is already in progress")]
    AlreadyDragging,
    #[error("Task {0} has a status change in flight")]
    PatchOutstanding(TaskId),
    #[error("Task {0} is not on the board")]
    UnknownTask(TaskId),
    #[error("Board {0} is not loaded")]
    BoardNotLoaded(String),
    #[error("No drag gesture in progress")]
    NotDragging,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragGesture {
    pub board: CacheKey,
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub source: DropPosition,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// Dropped outside any column, or the gesture was abandoned.
    Cancelled,
    /// Same position or same status; nothing dispatched.
    NoOp,
    Confirmed { task_id: TaskId, status: TaskStatus },
    Reverted { task_id: TaskId, failure: ApiFailure },
}

/// Result of releasing a drag.
#[derive(Debug)]
pub enum Release {
    Settled(DropOutcome),
    /// Patch applied; the status change is in flight.
    Optimistic(PendingDrop),
}

/// Handle to an in-flight optimistic status change. The patch is resolved
/// even if this handle is dropped.
#[derive(Debug)]
pub struct PendingDrop {
    mutation: MutationId,
    task_id: TaskId,
    handle: JoinHandle<DropOutcome>,
}

impl PendingDrop {
    pub fn mutation_id(&self) -> MutationId {
        self.mutation
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn settle(self) -> DropOutcome {
        let task_id = self.task_id;
        self.handle.await.unwrap_or_else(|e| DropOutcome::Reverted {
            task_id,
            failure: ApiFailure::transport(format!("status change task failed: {e}")),
        })
    }
}

#[derive(Default)]
struct EngineState {
    gesture: Option<DragGesture>,
    patches: HashMap<MutationId, Box<dyn OptimisticPatch>>,
    /// Task → mutation holding its outstanding patch.
    outstanding: HashMap<TaskId, MutationId>,
}

#[derive(Clone)]
pub struct OptimisticEngine {
    executor: RequestExecutor,
    state: Arc<Mutex<EngineState>>,
}

impl fmt::Debug for OptimisticEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("OptimisticEngine")
            .field("gesture", &state.gesture)
            .field("outstanding", &state.outstanding.len())
            .finish()
    }
}

impl OptimisticEngine {
    pub fn new(executor: RequestExecutor) -> Self {
        Self {
            executor,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> &CacheStore {
        self.executor.store()
    }

    pub fn gesture(&self) -> Option<DragGesture> {
        self.lock().gesture.clone()
    }

    /// Tasks with an unresolved patch.
    pub fn outstanding(&self) -> Vec<TaskId> {
        self.lock().outstanding.keys().cloned().collect()
    }

    pub fn has_outstanding(&self, task_id: &TaskId) -> bool {
        self.lock().outstanding.contains_key(task_id)
    }

    /// `idle → dragging`.
    pub fn begin_drag(&self, project_id: &ProjectId, task_id: &TaskId) -> Result<DragGesture, DragError> {
        let board = board_key(project_id);
        let entry = self
            .store()
            .read(&board)
            .and_then(|entry| entry.value)
            .ok_or_else(|| DragError::BoardNotLoaded(board.to_string()))?;
        let items = entry.data.as_array().map(Vec::as_slice).unwrap_or(&[]);
        let (flat, source) =
            locate(items, task_id).ok_or_else(|| DragError::UnknownTask(task_id.clone()))?;
        let status = item_status(&items[flat]).ok_or_else(|| DragError::UnknownTask(task_id.clone()))?;

        let mut state = self.lock();
        if state.gesture.is_some() {
            return Err(DragError::AlreadyDragging);
        }
        if state.outstanding.contains_key(task_id) {
            return Err(DragError::PatchOutstanding(task_id.clone()));
        }
        let gesture = DragGesture {
            board,
            project_id: project_id.clone(),
            task_id: task_id.clone(),
            source,
            status,
        };
        debug!(task = %task_id, column = %gesture.source.column, "drag started");
        state.gesture = Some(gesture.clone());
        Ok(gesture)
    }

    /// `dragging → idle` without a drop.
    pub fn cancel(&self) {
        if let Some(gesture) = self.lock().gesture.take() {
            debug!(task = %gesture.task_id, "drag cancelled");
        }
    }

    /// Finish the gesture. `None` means released outside any column.
    ///
    /// A move to another column applies the patch before returning. Must be
    /// called inside a Tokio runtime.
    pub fn release(&self, destination: Option<DropPosition>) -> Result<Release, DragError> {
        let (gesture, mutation, destination, target) = {
            let mut state = self.lock();
            let gesture = state.gesture.take().ok_or(DragError::NotDragging)?;

            let Some(destination) = destination else {
                debug!(task = %gesture.task_id, "dropped outside the board");
                return Ok(Release::Settled(DropOutcome::Cancelled));
            };
            let Some(target) = column_status(&destination.column) else {
                debug!(task = %gesture.task_id, column = %destination.column, "dropped on unknown column");
                return Ok(Release::Settled(DropOutcome::Cancelled));
            };
            if destination == gesture.source || target == gesture.status {
                debug!(task = %gesture.task_id, "drop without status change");
                return Ok(Release::Settled(DropOutcome::NoOp));
            }
            if state.outstanding.contains_key(&gesture.task_id) {
                return Err(DragError::PatchOutstanding(gesture.task_id.clone()));
            }

            let args = json!({
                "id": gesture.task_id.as_str(),
                "projectId": gesture.project_id.as_str(),
                "status": target.as_str(),
            });
            let tags = self
                .executor
                .catalog()
                .get(ops::UPDATE_TASK_STATUS)
                .map(|spec| spec.invalidates(&args))
                .unwrap_or_default();
            let mutation = PendingMutation::new(ops::UPDATE_TASK_STATUS, args)
                .invalidating(tags)
                .optimistic();
            state.outstanding.insert(gesture.task_id.clone(), mutation.id);
            (gesture, mutation, destination, target)
        };

        let mut patch: Box<dyn OptimisticPatch> = Box::new(TaskStatusPatch::new(
            gesture.board.clone(),
            gesture.task_id.clone(),
            destination,
            target,
        ));
        let applied = self
            .store()
            .patch(&gesture.board, |value| patch.apply(value))
            .unwrap_or(false);
        if !applied {
            warn!(task = %gesture.task_id, "board changed under the gesture; dropping it");
            self.lock().outstanding.remove(&gesture.task_id);
            return Ok(Release::Settled(DropOutcome::Cancelled));
        }

        let id = mutation.id;
        self.lock().patches.insert(id, patch);
        info!(task = %gesture.task_id, status = %target, mutation = %id, "optimistic status change applied");

        let engine = self.clone();
        let task_id = gesture.task_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = engine.executor.submit(mutation).await;
            engine.resolve(id, task_id, target, outcome)
        });
        Ok(Release::Optimistic(PendingDrop {
            mutation: id,
            task_id: gesture.task_id,
            handle,
        }))
    }

    /// [`release`](Self::release) and wait for the outcome.
    pub async fn drop_on(&self, destination: Option<DropPosition>) -> Result<DropOutcome, DragError> {
        match self.release(destination)? {
            Release::Settled(outcome) => Ok(outcome),
            Release::Optimistic(pending) => Ok(pending.settle().await),
        }
    }

    fn resolve(
        &self,
        id: MutationId,
        task_id: TaskId,
        status: TaskStatus,
        outcome: Result<Payload, ApiFailure>,
    ) -> DropOutcome {
        let patch = self.lock().patches.remove(&id);
        let result = match (outcome, patch) {
            (Ok(_), _) => {
                info!(task = %task_id, mutation = %id, "optimistic status change confirmed");
                DropOutcome::Confirmed {
                    task_id: task_id.clone(),
                    status,
                }
            }
            (Err(failure), patch) => {
                if let Some(patch) = patch {
                    self.store().patch(patch.key(), |value| patch.revert(value));
                }
                warn!(
                    task = %task_id,
                    mutation = %id,
                    error = %failure.message(),
                    "optimistic status change reverted"
                );
                DropOutcome::Reverted {
                    task_id: task_id.clone(),
                    failure,
                }
            }
        };
        let mut state = self.lock();
        if state.outstanding.get(&task_id) == Some(&id) {
            state.outstanding.remove(&task_id);
        }
        result
    }
}
