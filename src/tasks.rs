//! Task list operations for the signed-in user.
//!
//! SYSTEM CONTEXT
//! ==============
//! Reads identity from the [`SessionStore`] and goes straight to the record
//! service for the task collection. Task rows never pass through store state.
//!
//! DESIGN
//! ======
//! Form input arrives as a [`TaskDraft`] of raw strings and is validated into
//! a [`NewTask`] before anything is sent. Listings are re-sorted locally
//! because the service orders `priority` as text.

use std::cmp::Ordering;

use serde_json::Value;
use time::Date;
use time::macros::format_description;

use crate::remote::types::{decode_record, stamp_updated_at, to_fields};
use crate::remote::{Collection, NewTask, Priority, RecordQuery, RemoteError, Task, TaskPatch};
use crate::store::{Session, SessionStore, StoreError};

// =============================================================================
// ERRORS
// =============================================================================

/// Reasons a draft cannot become a task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("a task needs a title")]
    MissingTitle,

    #[error("due date `{0}` is not a YYYY-MM-DD date")]
    InvalidDueDate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Remote(#[from] StoreError),
}

impl From<RemoteError> for TaskError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(StoreError::from(err))
    }
}

// =============================================================================
// DRAFTS
// =============================================================================

/// Unvalidated task form input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    /// `YYYY-MM-DD`, or empty for no due date.
    pub due_date: String,
    /// Comma-separated.
    pub tags: String,
    pub is_shared: bool,
}

impl TaskDraft {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Self::default() }
    }

    /// Validate the draft into an insert payload owned by `owner`.
    ///
    /// # Errors
    ///
    /// [`DraftError::MissingTitle`] for a blank title,
    /// [`DraftError::InvalidDueDate`] for a malformed date.
    pub fn into_new_task(self, owner: &Session) -> Result<NewTask, DraftError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(DraftError::MissingTitle);
        }
        let description = self.description.trim();
        Ok(NewTask {
            title: title.to_owned(),
            description: (!description.is_empty()).then(|| description.to_owned()),
            priority: self.priority,
            due_date: parse_due_date(&self.due_date)?,
            tags: parse_tags(&self.tags),
            user_id: owner.id().to_owned(),
            is_shared: self.is_shared,
        })
    }
}

/// Split comma-separated tags. `None` when no tag survives trimming.
#[must_use]
pub fn parse_tags(raw: &str) -> Option<Vec<String>> {
    let tags: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect();
    (!tags.is_empty()).then_some(tags)
}

/// Parse a `YYYY-MM-DD` due date. Blank input means no due date.
///
/// # Errors
///
/// [`DraftError::InvalidDueDate`] when the text is not a calendar date.
pub fn parse_due_date(raw: &str) -> Result<Option<Date>, DraftError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(Some)
        .map_err(|_| DraftError::InvalidDueDate(raw.to_owned()))
}

// =============================================================================
// ORDERING
// =============================================================================

/// Dashboard order: priority high first, then earliest due date (undated
/// last), then newest.
pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Which of the user's lists to show.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskView {
    #[default]
    Personal,
    Shared,
}

impl TaskView {
    #[must_use]
    pub fn is_shared(self) -> bool {
        matches!(self, Self::Shared)
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Task operations on behalf of the store's current session.
#[derive(Clone)]
pub struct TaskService {
    store: SessionStore,
}

impl TaskService {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    fn owner(&self) -> Result<Session, TaskError> {
        self.store.session().ok_or(TaskError::Remote(StoreError::Unauthenticated))
    }

    /// The owner's tasks in `view`, in dashboard order.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without a session, or the remote failure.
    pub async fn list(&self, view: TaskView) -> Result<Vec<Task>, TaskError> {
        let owner = self.owner()?;
        let query = RecordQuery::new()
            .eq("user_id", owner.id())
            .eq("is_shared", view.is_shared())
            .order_by("priority", false)
            .order_by("due_date", true)
            .order_by("created_at", false);
        let rows = self.store.remote().select_records(Collection::Tasks, &query).await?;
        let mut tasks = rows
            .into_iter()
            .map(decode_record::<Task>)
            .collect::<Result<Vec<_>, _>>()?;
        sort_tasks(&mut tasks);
        tracing::debug!(user_id = %owner.id(), ?view, count = tasks.len(), "listed tasks");
        Ok(tasks)
    }

    /// Validate and insert a new task.
    ///
    /// # Errors
    ///
    /// A [`DraftError`] before anything is sent, `Unauthenticated` without a
    /// session, or the remote failure.
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, TaskError> {
        let owner = self.owner()?;
        let new_task = draft.into_new_task(&owner)?;
        let row = self
            .store
            .remote()
            .insert_record(Collection::Tasks, to_fields(&new_task))
            .await?;
        let task: Task = decode_record(row)?;
        tracing::info!(task_id = %task.id, user_id = %owner.id(), "task created");
        Ok(task)
    }

    /// Flip a task's completion flag.
    ///
    /// # Errors
    ///
    /// Same as [`TaskService::update`].
    pub async fn toggle_complete(&self, task: &Task) -> Result<Task, TaskError> {
        self.set_completed(&task.id, !task.completed).await
    }

    /// # Errors
    ///
    /// Same as [`TaskService::update`].
    pub async fn set_completed(&self, id: &str, completed: bool) -> Result<Task, TaskError> {
        let patch = TaskPatch { completed: Some(completed), ..TaskPatch::default() };
        self.update(id, patch).await
    }

    /// Apply the set fields of `patch`, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without a session, `ValidationRejected` when no
    /// visible task has `id`, or the remote failure.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, TaskError> {
        self.owner()?;
        let mut fields = to_fields(&patch);
        stamp_updated_at(&mut fields);
        let row = self.store.remote().update_record(Collection::Tasks, id, fields).await?;
        let task = decode_record(row)?;
        tracing::debug!(task_id = %id, "task updated");
        Ok(task)
    }

    /// # Errors
    ///
    /// `Unauthenticated` without a session, or the remote failure.
    pub async fn delete(&self, id: &str) -> Result<(), TaskError> {
        self.owner()?;
        self.store.remote().delete_record(Collection::Tasks, id).await?;
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Fetch one task by id.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without a session, or the remote failure.
    pub async fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        self.owner()?;
        let row: Option<Value> = self.store.remote().get_record(Collection::Tasks, id).await?;
        Ok(row.map(decode_record).transpose()?)
    }
}

#[cfg(test)]
#[path = "tasks_test.rs"]
mod tests;
