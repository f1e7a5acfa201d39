use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::models::{SearchResults, Task, TaskStatus, TaskType, TravelContext, TravelPreferences};

/// Partial update for a [`Task`] record.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub id: Option<String>,
    pub status: Option<TaskStatus>,
    pub message_id: Option<String>,
    pub regenerate: Option<bool>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }
}

/// Live task records keyed by type; at most one per type.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<HashMap<TaskType, Task>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task`, replacing any existing task of the same type.
    pub fn add_task(&self, task: Task) {
        lock(&self.tasks).insert(task.task_type, task);
    }

    /// Merges `patch` into the task of `task_type`, creating an idle record
    /// first if none exists. Returns the updated task.
    pub fn update_task(&self, task_type: TaskType, patch: TaskPatch) -> Task {
        let mut tasks = lock(&self.tasks);
        let task = tasks.entry(task_type).or_insert_with(|| Task::new(task_type));
        if let Some(id) = patch.id {
            task.id = Some(id);
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(message_id) = patch.message_id {
            task.message_id = Some(message_id);
        }
        if let Some(regenerate) = patch.regenerate {
            task.regenerate = regenerate;
        }
        task.clone()
    }

    pub fn get(&self, task_type: TaskType) -> Option<Task> {
        lock(&self.tasks).get(&task_type).cloned()
    }

    pub fn status(&self, task_type: TaskType) -> Option<TaskStatus> {
        lock(&self.tasks).get(&task_type).map(|task| task.status)
    }

    pub fn remove_task(&self, task_type: TaskType) -> Option<Task> {
        lock(&self.tasks).remove(&task_type)
    }

    pub fn reset(&self) {
        lock(&self.tasks).clear();
    }
}

#[derive(Default)]
struct TravelInner {
    preferences: Option<TravelPreferences>,
    context: Option<TravelContext>,
}

/// Trip parameters and search results shared by the task-initiation code.
#[derive(Clone, Default)]
pub struct TravelStore {
    inner: Arc<Mutex<TravelInner>>,
}

impl TravelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `preferences` into what is already known.
    pub fn set_preferences(&self, preferences: TravelPreferences) {
        let mut inner = lock(&self.inner);
        match inner.preferences.as_mut() {
            Some(existing) => existing.merge(preferences),
            None => inner.preferences = Some(preferences),
        }
    }

    pub fn set_context(&self, context: TravelContext) {
        let mut inner = lock(&self.inner);
        match inner.context.as_mut() {
            Some(existing) => existing.merge(context),
            None => inner.context = Some(context),
        }
    }

    pub fn set_flight_results(&self, results: SearchResults) {
        self.set_context(TravelContext { flight_results: Some(results), ..TravelContext::default() });
    }

    pub fn set_hotel_results(&self, results: SearchResults) {
        self.set_context(TravelContext { hotel_results: Some(results), ..TravelContext::default() });
    }

    pub fn preferences(&self) -> Option<TravelPreferences> {
        lock(&self.inner).preferences.clone()
    }

    /// The stored context with the current preferences folded in.
    pub fn context(&self) -> TravelContext {
        let inner = lock(&self.inner);
        let mut context = inner.context.clone().unwrap_or_default();
        if let Some(preferences) = &inner.preferences {
            let mut merged = preferences.clone();
            merged.merge(context.preferences);
            context.preferences = merged;
        }
        context
    }

    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.preferences = None;
        inner.context = None;
    }
}
