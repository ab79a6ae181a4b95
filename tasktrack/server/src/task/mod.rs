use crate::entities::*;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use sea_orm::*;
use std::collections::BTreeMap;
use std::fmt;

pub mod api;

pub use api::{TaskState, create_task_router};

/// Maximum number of characters allowed in a task's content.
pub const CONTENT_MAX_LENGTH: usize = 100;

const INITIAL_VERSION: i32 = 1;

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Task {
    id: i32,
    content: String,
    due_date: Option<DateTime<Utc>>,
    is_complete: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i32,
}

impl Task {
    /// Returns the ID of the task.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the content of the task.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the optional due date of the task.
    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    /// Returns whether the task has been completed.
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Returns when the task was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the task was last written.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the row version the task was read at.
    pub fn version(&self) -> i32 {
        self.version
    }
}

impl From<task::Model> for Task {
    fn from(model: task::Model) -> Self {
        Self {
            id: model.id,
            content: model.content,
            due_date: model.due_date,
            is_complete: model.is_complete,
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        }
    }
}

/// The caller-owned fields of a task that is about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub content: String,
    pub due_date: Option<DateTime<Utc>>,
    pub is_complete: bool,
}

impl TaskDraft {
    pub fn new(content: impl Into<String>, due_date: Option<DateTime<Utc>>) -> Self {
        Self {
            content: content.into(),
            due_date,
            is_complete: false,
        }
    }

    /// Marks the draft as already completed.
    pub fn completed(mut self, is_complete: bool) -> Self {
        self.is_complete = is_complete;
        self
    }
}

/// A full replacement for a stored task, carrying the version of the
/// snapshot the caller edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: i32,
    pub content: String,
    pub due_date: Option<DateTime<Utc>>,
    pub is_complete: bool,
    pub version: i32,
}

impl TaskRecord {
    /// Checks the record against the id it is about to be written to.
    pub fn validate_for(&self, id: i32) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.id != id {
            errors.add(
                "id",
                format!(
                    "The id in the body ({}) does not match the id in the path ({}).",
                    self.id, id
                ),
            );
        }
        if let Err(content_errors) = validate_content(&self.content) {
            errors.extend(content_errors);
        }
        errors.into_result()
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            content: task.content,
            due_date: task.due_date,
            is_complete: task.is_complete,
            version: task.version,
        }
    }
}

/// Field-level validation failures, keyed by the JSON field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding a single failure.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    pub fn into_fields(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    /// Returns `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validates task content: required, not blank, at most
/// [`CONTENT_MAX_LENGTH`] characters.
pub fn validate_content(content: &str) -> Result<(), ValidationErrors> {
    if content.trim().is_empty() {
        return Err(ValidationErrors::single(
            "content",
            "The content field is required.",
        ));
    }
    // Postgres text columns cannot store NUL.
    if content.contains('\0') {
        return Err(ValidationErrors::single(
            "content",
            "The content field must not contain NUL characters.",
        ));
    }
    if content.chars().count() > CONTENT_MAX_LENGTH {
        return Err(ValidationErrors::single(
            "content",
            format!(
                "The content field must be at most {} characters long.",
                CONTENT_MAX_LENGTH
            ),
        ));
    }
    Ok(())
}

/// Error type for TaskService operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    /// The input broke a field rule; nothing was written.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    /// Represents a task not found error.
    #[error("Task with ID {0} not found")]
    TaskNotFound(i32),
    /// The task changed after the caller's snapshot was taken.
    #[error("Task with ID {0} was modified by another writer")]
    Conflict(i32),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Current time at the precision the store keeps (microseconds).
fn storage_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp for a write following one stamped `previous`. Always later than
/// `previous`, even when the clock has not advanced past it.
fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(previous + Duration::microseconds(1))
}

/// Row version after a successful write. Only compared for equality, so
/// wrapping at `i32::MAX` is harmless.
fn next_version(version: i32) -> i32 {
    version.wrapping_add(1)
}

/// Reads and writes tasks, owning their timestamps and row versions.
pub struct TaskService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl TaskService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> TaskService<'_> {
        TaskService { db }
    }

    /// Retrieves tasks in creation order.
    ///
    /// # Arguments
    ///
    /// * `is_complete` - When present, only tasks whose completion flag equals it are returned.
    #[tracing::instrument(skip(self))]
    pub async fn get_tasks(
        &self,
        is_complete: Option<bool>,
    ) -> Result<Vec<Task>, TaskServiceError> {
        let mut query = task::Entity::find().order_by_asc(task::Column::Id);
        if let Some(is_complete) = is_complete {
            query = query.filter(task::Column::IsComplete.eq(is_complete));
        }
        let tasks = query.all(self.db).await?.into_iter().map(Task::from).collect();
        Ok(tasks)
    }

    /// Retrieves a task by its ID.
    #[tracing::instrument(skip(self))]
    pub async fn get_task_by_id(&self, id: i32) -> Result<Task, TaskServiceError> {
        let model = task::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(id))?;
        Ok(Task::from(model))
    }

    /// Creates a new task.
    ///
    /// The store assigns the ID. Both timestamps are set to the same instant
    /// and the row starts at version 1.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `Task` if successful, or an error otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task, TaskServiceError> {
        validate_content(&draft.content)?;

        let now = storage_now();
        let active_model = task::ActiveModel {
            content: ActiveValue::Set(draft.content),
            due_date: ActiveValue::Set(draft.due_date.map(|due| due.trunc_subsecs(6))),
            is_complete: ActiveValue::Set(draft.is_complete),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            version: ActiveValue::Set(INITIAL_VERSION),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        tracing::info!("Created task {}", created_model.id);
        Ok(Task::from(created_model))
    }

    /// Replaces the caller-owned fields of a task.
    ///
    /// The write only lands if the stored row is still at `record.version`.
    /// A rejected write is resolved by looking the row up again: a missing row
    /// is reported as `TaskNotFound`, a present one as `Conflict`.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the task to update. Must equal `record.id`.
    /// * `record` - The full replacement, as edited from a previously read task.
    #[tracing::instrument(skip(self))]
    pub async fn update_task(
        &self,
        id: i32,
        record: TaskRecord,
    ) -> Result<Task, TaskServiceError> {
        record.validate_for(id)?;

        let stored = task::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(TaskServiceError::TaskNotFound(id))?;
        if stored.version != record.version {
            tracing::warn!(
                "Rejected update of task {}: snapshot version {} is behind stored version {}",
                id,
                record.version,
                stored.version
            );
            return Err(TaskServiceError::Conflict(id));
        }

        let updated_at = next_updated_at(stored.updated_at, storage_now());
        let version = next_version(stored.version);
        let due_date = record.due_date.map(|due| due.trunc_subsecs(6));
        let changes = task::ActiveModel {
            content: ActiveValue::Set(record.content.clone()),
            due_date: ActiveValue::Set(due_date),
            is_complete: ActiveValue::Set(record.is_complete),
            updated_at: ActiveValue::Set(updated_at),
            version: ActiveValue::Set(version),
            ..Default::default()
        };
        let result = task::Entity::update_many()
            .set(changes)
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::Version.eq(record.version))
            .exec(self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(self.resolve_rejected_write(id).await);
        }

        Ok(Task {
            id,
            content: record.content,
            due_date,
            is_complete: record.is_complete,
            created_at: stored.created_at,
            updated_at,
            version,
        })
    }

    /// Deletes a task by its ID. The row is gone for good.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task_by_id(&self, id: i32) -> Result<(), TaskServiceError> {
        let result = task::Entity::delete_by_id(id).exec(self.db).await?;
        if result.rows_affected == 0 {
            return Err(TaskServiceError::TaskNotFound(id));
        }
        tracing::info!("Deleted task {}", id);
        Ok(())
    }

    /// Works out why a conditional update matched no row.
    async fn resolve_rejected_write(&self, id: i32) -> TaskServiceError {
        match task::Entity::find_by_id(id).one(self.db).await {
            Ok(Some(current)) => {
                tracing::warn!(
                    "Task {} was modified concurrently (now at version {})",
                    id,
                    current.version
                );
                TaskServiceError::Conflict(id)
            }
            Ok(None) => TaskServiceError::TaskNotFound(id),
            Err(err) => TaskServiceError::Database(err),
        }
    }
}
