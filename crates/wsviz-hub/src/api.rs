use crate::hub::HubState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::warn;
use wsviz_core::{progress_detail, ArchivedTask, ProgressDetail, Task, Workspace};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListResponse<T> {
    pub tasks: Vec<T>,
    pub count: usize,
    pub last_updated: DateTime<Utc>,
}

impl<T> TaskListResponse<T> {
    fn new(tasks: Vec<T>) -> Self {
        Self {
            count: tasks.len(),
            tasks,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceListResponse {
    pub workspaces: Vec<Workspace>,
    pub count: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub task_id: String,
    #[serde(flatten)]
    pub detail: ProgressDetail,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitoring {
    pub todo_path: String,
    pub workspaces_path: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    /// Milliseconds since the hub started.
    pub uptime: u128,
    pub tasks: usize,
    pub workspaces: usize,
    pub clients: usize,
    pub monitoring: Monitoring,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/api/tasks", get(tasks))
        .route("/api/workspaces", get(workspaces))
        .route("/api/archived-tasks", get(archived_tasks))
        .route("/api/workspace/:task_id/progress", get(workspace_progress))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .with_state(hub)
}

pub async fn tasks(State(hub): State<Arc<HubState>>) -> Json<TaskListResponse<Task>> {
    let tasks = hub.store().read().await.tasks().to_vec();
    Json(TaskListResponse::new(tasks))
}

pub async fn workspaces(State(hub): State<Arc<HubState>>) -> Json<WorkspaceListResponse> {
    let workspaces: Vec<Workspace> = hub.store().read().await.workspaces().cloned().collect();
    Json(WorkspaceListResponse {
        count: workspaces.len(),
        workspaces,
        last_updated: Utc::now(),
    })
}

pub async fn archived_tasks(
    State(hub): State<Arc<HubState>>,
) -> Json<TaskListResponse<ArchivedTask>> {
    Json(TaskListResponse::new(hub.archived_tasks().await))
}

pub async fn workspace_progress(
    State(hub): State<Arc<HubState>>,
    Path(task_id): Path<String>,
) -> Response {
    let layout = hub.layout().clone();
    let lookup_id = task_id.clone();
    let lookup = tokio::task::spawn_blocking(move || progress_detail(&layout, &lookup_id))
        .await
        .map_err(|err| err.to_string())
        .and_then(|found| found.map_err(|err| err.to_string()));
    match lookup {
        Ok(Some(detail)) => Json(ProgressResponse {
            task_id,
            detail,
            last_updated: Utc::now(),
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "Workspace not found or no PROGRESS.md".to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            warn!(event = "progress_read_failed", task_id = %task_id, error = %err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { error: err }),
            )
                .into_response()
        }
    }
}

pub async fn status(State(hub): State<Arc<HubState>>) -> Json<StatusResponse> {
    let (tasks, workspaces) = {
        let store = hub.store().read().await;
        (store.task_count(), store.workspace_count())
    };
    let layout = hub.layout();
    Json(StatusResponse {
        status: "running",
        uptime: hub.uptime().as_millis(),
        tasks,
        workspaces,
        clients: hub.viewer_count().await,
        monitoring: Monitoring {
            todo_path: layout.todo_dir().display().to_string(),
            workspaces_path: layout.workspaces_dir().display().to_string(),
        },
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}
