use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware::from_fn;
use axum::routing::{any, get};
use migration::MigratorTrait;
use sea_orm::Database;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::task::{TaskState, api::TasksOpenApi, create_task_router};

pub mod problem;

#[derive(OpenApi)]
#[openapi(info(
    title = "Task API",
    version = "0.1.0",
    description = "Create, list, edit and delete tasks"
))]
pub struct ApiDoc;

impl ApiDoc {
    /// The full OpenAPI document, task endpoints included.
    pub fn document() -> utoipa::openapi::OpenApi {
        let mut doc = ApiDoc::openapi();
        doc.merge(TasksOpenApi::openapi());
        doc
    }
}

/// Builds every route with the error translator and request tracing applied.
pub fn create_router(task_state: TaskState) -> Router {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/error", any(problem::error_handler))
        .merge(create_task_router(task_state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(problem::translate_problems))
                .layer(CatchPanicLayer::custom(problem::handle_panic)),
        )
}

/// CORS policy admitting only the configured origins.
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| HeaderValue::from_str(origin))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::LOCATION]))
}

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: Config) -> anyhow::Result<()> {
    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    let db = Database::connect(&config.db_url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied successfully");

    let task_state = TaskState { db: Arc::new(db) };

    let mut app = create_router(task_state);
    if config.swagger_ui {
        app = app.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::document()),
        );
        tracing::info!("Swagger UI available at /swagger-ui");
    }
    let app = app.layer(cors_layer(&config.allowed_origins())?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}
