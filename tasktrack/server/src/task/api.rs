use crate::task::{
    Task, TaskDraft, TaskRecord, TaskService, TaskServiceError, ValidationErrors,
};
use crate::web::problem::{Problem, ProblemDetails};
use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
pub struct TaskState {
    pub db: Arc<sea_orm::DatabaseConnection>,
}

/// JSON representation of a Task for API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskJson {
    /// Unique identifier assigned by the server
    pub id: i32,
    /// What needs doing, at most 100 characters
    pub content: String,
    /// Optional deadline
    pub due_date: Option<DateTime<Utc>>,
    /// Whether the task has been completed
    pub is_complete: bool,
    /// When the task was created (UTC)
    pub created_at: DateTime<Utc>,
    /// When the task was last written (UTC)
    pub updated_at: DateTime<Utc>,
    /// Row version; send it back unchanged when updating
    pub version: i32,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        Self {
            id: task.id(),
            content: task.content().to_string(),
            due_date: task.due_date(),
            is_complete: task.is_complete(),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
            version: task.version(),
        }
    }
}

/// Request body for creating a task.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTaskJson {
    /// What needs doing, at most 100 characters
    pub content: Option<String>,
    /// Optional deadline
    pub due_date: Option<DateTime<Utc>>,
    /// Defaults to false
    pub is_complete: Option<bool>,
}

impl TryFrom<NewTaskJson> for TaskDraft {
    type Error = ValidationErrors;

    fn try_from(json: NewTaskJson) -> Result<Self, Self::Error> {
        let content = json
            .content
            .ok_or_else(|| ValidationErrors::single("content", "The content field is required."))?;
        Ok(TaskDraft::new(content, json.due_date).completed(json.is_complete.unwrap_or(false)))
    }
}

/// Request body for replacing a task. Server-owned fields such as
/// `createdAt` and `updatedAt` are ignored when present.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdateJson {
    /// Must match the id in the path
    pub id: Option<i32>,
    pub content: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    /// Defaults to false
    pub is_complete: Option<bool>,
    /// The version of the task as it was read
    pub version: Option<i32>,
}

impl TryFrom<TaskUpdateJson> for TaskRecord {
    type Error = ValidationErrors;

    fn try_from(json: TaskUpdateJson) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::new();
        if json.id.is_none() {
            errors.add("id", "The id field is required.");
        }
        if json.content.is_none() {
            errors.add("content", "The content field is required.");
        }
        if json.version.is_none() {
            errors.add("version", "The version field is required.");
        }
        match (json.id, json.content, json.version) {
            (Some(id), Some(content), Some(version)) => Ok(TaskRecord {
                id,
                content,
                due_date: json.due_date,
                is_complete: json.is_complete.unwrap_or(false),
                version,
            }),
            _ => Err(errors),
        }
    }
}

/// Query parameters for filtering tasks by completion.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TasksQuery {
    #[serde(default)]
    pub is_complete: Option<bool>,
}

impl axum::response::IntoResponse for TaskServiceError {
    fn into_response(self) -> Response {
        let problem = match self {
            TaskServiceError::Validation(errors) => Problem::validation(errors),
            TaskServiceError::TaskNotFound(id) => {
                Problem::not_found(format!("Task with ID {} was not found.", id))
            }
            TaskServiceError::Conflict(_) => Problem::conflict(),
            TaskServiceError::Database(err) => Problem::internal(err.to_string()),
        };
        problem.into_response()
    }
}

fn json_rejection(rejection: JsonRejection) -> TaskServiceError {
    ValidationErrors::single("body", rejection.body_text()).into()
}

fn path_rejection(rejection: PathRejection) -> TaskServiceError {
    ValidationErrors::single("id", rejection.body_text()).into()
}

fn query_rejection(rejection: QueryRejection) -> TaskServiceError {
    ValidationErrors::single("isComplete", rejection.body_text()).into()
}

/// Handler for GET /tasks - Returns tasks, optionally filtered by completion.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/tasks",
    params(
        ("isComplete" = Option<bool>, Query, description = "Only return tasks with this completion state")
    ),
    responses(
        (status = 200, description = "Tasks in creation order", body = [TaskJson]),
        (status = 400, description = "Malformed filter", body = ProblemDetails),
        (status = 500, description = "Internal server error", body = ProblemDetails)
    ),
    tag = "Tasks"
)]
pub async fn get_tasks_handler(
    State(state): State<TaskState>,
    query: Result<Query<TasksQuery>, QueryRejection>,
) -> Result<Json<Vec<TaskJson>>, TaskServiceError> {
    let Query(query) = query.map_err(query_rejection)?;
    let tasks = TaskService::new(&state.db)
        .get_tasks(query.is_complete)
        .await?;
    Ok(Json(tasks.into_iter().map(TaskJson::from).collect()))
}

/// Handler for GET /tasks/{id}.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 200, description = "The task", body = TaskJson),
        (status = 404, description = "No task with this ID", body = ProblemDetails)
    ),
    tag = "Tasks"
)]
pub async fn get_task_handler(
    State(state): State<TaskState>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<Json<TaskJson>, TaskServiceError> {
    let Path(id) = id.map_err(path_rejection)?;
    let task = TaskService::new(&state.db).get_task_by_id(id).await?;
    Ok(Json(TaskJson::from(task)))
}

/// Handler for POST /tasks - Creates a task and points at it with a Location header.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/tasks",
    request_body = NewTaskJson,
    responses(
        (status = 201, description = "Task created", body = TaskJson),
        (status = 400, description = "Invalid task", body = ProblemDetails)
    ),
    tag = "Tasks"
)]
pub async fn create_task_handler(
    State(state): State<TaskState>,
    payload: Result<Json<NewTaskJson>, JsonRejection>,
) -> Result<impl IntoResponse, TaskServiceError> {
    let Json(payload) = payload.map_err(json_rejection)?;
    let draft = TaskDraft::try_from(payload)?;
    let task = TaskService::new(&state.db).create_task(draft).await?;
    let location = format!("/tasks/{}", task.id());
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(TaskJson::from(task)),
    ))
}

/// Handler for PUT /tasks/{id} - Replaces a task from a previously read snapshot.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    put,
    path = "/tasks/{id}",
    params(("id" = i32, Path, description = "Task ID")),
    request_body = TaskUpdateJson,
    responses(
        (status = 200, description = "Task updated", body = TaskJson),
        (status = 400, description = "Invalid task or id mismatch", body = ProblemDetails),
        (status = 404, description = "No task with this ID", body = ProblemDetails),
        (status = 409, description = "Task changed since it was read", body = ProblemDetails)
    ),
    tag = "Tasks"
)]
pub async fn update_task_handler(
    State(state): State<TaskState>,
    id: Result<Path<i32>, PathRejection>,
    payload: Result<Json<TaskUpdateJson>, JsonRejection>,
) -> Result<Json<TaskJson>, TaskServiceError> {
    let Path(id) = id.map_err(path_rejection)?;
    let Json(payload) = payload.map_err(json_rejection)?;
    let record = TaskRecord::try_from(payload)?;
    let task = TaskService::new(&state.db).update_task(id, record).await?;
    Ok(Json(TaskJson::from(task)))
}

/// Handler for DELETE /tasks/{id}.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 404, description = "No task with this ID", body = ProblemDetails)
    ),
    tag = "Tasks"
)]
pub async fn delete_task_handler(
    State(state): State<TaskState>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<StatusCode, TaskServiceError> {
    let Path(id) = id.map_err(path_rejection)?;
    TaskService::new(&state.db).delete_task_by_id(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        get_tasks_handler,
        get_task_handler,
        create_task_handler,
        update_task_handler,
        delete_task_handler
    ),
    components(schemas(TaskJson, NewTaskJson, TaskUpdateJson, ProblemDetails)),
    tags((name = "Tasks", description = "Task tracking endpoints"))
)]
pub struct TasksOpenApi;

/// Creates and returns the task router.
pub fn create_task_router(state: TaskState) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks_handler).post(create_task_handler))
        .route(
            "/tasks/{id}",
            get(get_task_handler)
                .put(update_task_handler)
                .delete(delete_task_handler),
        )
        .with_state(state)
}
