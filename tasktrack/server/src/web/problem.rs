//! Uniform problem bodies for every failed request.
//!
//! Handlers never render error bodies themselves. They answer with a
//! [`Problem`] stashed in the response extensions, and
//! [`translate_problems`] turns it into a [`ProblemDetails`] body once the
//! request path is known. This is also the only place internal failures are
//! logged.

use crate::task::ValidationErrors;
use axum::{
    Json,
    extract::Request,
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use utoipa::ToSchema;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

const INTERNAL_TITLE: &str = "An error occurred while processing your request.";
const INTERNAL_DETAIL: &str =
    "Please try again later. If the problem persists, contact support.";
const CONFLICT_TITLE: &str = "Conflict";
const CONFLICT_DETAIL: &str =
    "The item you tried to update was modified or deleted by another user.";
const VALIDATION_TITLE: &str = "One or more validation errors occurred.";
const VALIDATION_DETAIL: &str = "See the errors property for details.";
const NOT_FOUND_TITLE: &str = "Not Found";

/// Error body returned for every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProblemDetails {
    /// HTTP status code
    pub status: u16,
    /// Short summary of the problem type
    pub title: String,
    /// Explanation specific to this occurrence
    pub detail: String,
    /// Path of the request that failed
    pub instance: String,
    /// Field-level messages, only present for validation problems
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
            )],
            Json(self),
        )
            .into_response()
    }
}

/// A failure waiting to be rendered by [`translate_problems`].
#[derive(Debug, Clone)]
pub struct Problem {
    status: StatusCode,
    title: String,
    detail: String,
    errors: BTreeMap<String, Vec<String>>,
    /// Logged by the translator, never sent to the caller.
    internal: Option<String>,
}

impl Problem {
    fn new(status: StatusCode, title: &str, detail: impl Into<String>) -> Self {
        Self {
            status,
            title: title.to_string(),
            detail: detail.into(),
            errors: BTreeMap::new(),
            internal: None,
        }
    }

    pub fn validation(errors: ValidationErrors) -> Self {
        Self {
            errors: errors.into_fields(),
            ..Self::new(StatusCode::BAD_REQUEST, VALIDATION_TITLE, VALIDATION_DETAIL)
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, NOT_FOUND_TITLE, detail)
    }

    pub fn conflict() -> Self {
        Self::new(StatusCode::CONFLICT, CONFLICT_TITLE, CONFLICT_DETAIL)
    }

    /// A generic 500 whose `cause` only reaches the logs.
    pub fn internal(cause: impl Into<String>) -> Self {
        Self {
            internal: Some(cause.into()),
            ..Self::unhandled()
        }
    }

    /// A generic 500 with nothing to log.
    pub fn unhandled() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_TITLE, INTERNAL_DETAIL)
    }

    /// Renders the body for the request made to `instance`.
    pub fn into_details(self, instance: impl Into<String>) -> ProblemDetails {
        ProblemDetails {
            status: self.status.as_u16(),
            title: self.title,
            detail: self.detail,
            instance: instance.into(),
            errors: self.errors,
        }
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let mut response = self.status.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Middleware rendering any [`Problem`] left on the response.
pub async fn translate_problems(request: Request, next: Next) -> Response {
    let instance = request.uri().path().to_string();
    let mut response = next.run(request).await;

    let Some(problem) = response.extensions_mut().remove::<Problem>() else {
        return response;
    };
    if let Some(internal) = problem.internal.as_deref() {
        tracing::error!(
            "An unhandled error occurred on {} ({}): {}",
            instance,
            problem.status,
            internal
        );
    }
    problem.into_details(instance).into_response()
}

/// Turns a handler panic into a generic 500 problem.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    Problem::internal(format!("handler panicked: {}", message)).into_response()
}

/// Handler for /error, the generic failure endpoint.
#[tracing::instrument]
pub async fn error_handler() -> Problem {
    Problem::unhandled()
}
