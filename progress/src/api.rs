use crate::config::Listener as ListenerConfig;
use crate::digest::{DataResponse, Mode};
use crate::errors::ProgressError;
use crate::ingest::CreateEntriesRequest;
use crate::shield::ShieldParams;
use crate::structure::{DeleteVersionRequest, ProjectListing, StructureRequest};
use crate::tracker::Tracker;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub fn router(tracker: Tracker) -> Router {
    Router::new()
        .route("/projects/", get(list_projects))
        .route(
            "/projects/{project}/{version}/",
            post(create_structure).delete(delete_version),
        )
        .route("/data/", get(root_data))
        .route("/data/{project}/", get(project_data))
        .route(
            "/data/{project}/{version}/",
            get(version_data).post(create_entries),
        )
        .route("/data/{project}/{version}/{category}/", get(category_data))
        .with_state(tracker)
}

pub async fn serve(listener: &ListenerConfig, tracker: Tracker) -> Result<(), ApiError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "progress api listening");

    axum::serve(listener, router(tracker)).await?;
    Ok(())
}

#[derive(Serialize)]
struct WriteResponse {
    result: &'static str,
    wrote: usize,
}

impl IntoResponse for WriteResponse {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct DeleteResponse {
    result: &'static str,
    deleted: usize,
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for DataResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Deserialize, Debug)]
struct DataParams {
    mode: Option<String>,
    #[serde(flatten)]
    shield: ShieldParams,
}

impl DataParams {
    fn mode(&self) -> Result<Mode, ProgressError> {
        Mode::parse(self.mode.as_deref())
    }
}

/// Runs store work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ProgressError>
where
    F: FnOnce() -> Result<T, ProgressError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProgressError::Internal(format!("blocking task failed: {e}")))?
}

async fn list_projects(
    State(tracker): State<Tracker>,
) -> Result<Json<Vec<ProjectListing>>, ProgressError> {
    blocking(move || tracker.list_projects()).await.map(Json)
}

async fn create_structure(
    State(tracker): State<Tracker>,
    Path((project, version)): Path<(String, String)>,
    body: Bytes,
) -> Result<WriteResponse, ProgressError> {
    let request = StructureRequest::from_json(&body)?;
    let wrote = blocking(move || tracker.apply_structure(&project, &version, &request)).await?;

    Ok(WriteResponse {
        result: "success",
        wrote,
    })
}

async fn delete_version(
    State(tracker): State<Tracker>,
    Path((project, version)): Path<(String, String)>,
    body: Bytes,
) -> Result<DeleteResponse, ProgressError> {
    let request = DeleteVersionRequest::from_json(&body)?;
    let deleted = blocking(move || tracker.delete_version(&project, &version, &request)).await?;

    Ok(DeleteResponse {
        result: "success",
        deleted,
    })
}

async fn root_data(
    State(tracker): State<Tracker>,
    Query(params): Query<DataParams>,
) -> Result<DataResponse, ProgressError> {
    let mode = params.mode()?;
    blocking(move || tracker.root_data(mode)).await
}

async fn project_data(
    State(tracker): State<Tracker>,
    Path(project): Path<String>,
    Query(params): Query<DataParams>,
) -> Result<DataResponse, ProgressError> {
    let mode = params.mode()?;
    blocking(move || tracker.project_data(&project, mode)).await
}

async fn version_data(
    State(tracker): State<Tracker>,
    Path((project, version)): Path<(String, String)>,
    Query(params): Query<DataParams>,
) -> Result<DataResponse, ProgressError> {
    let mode = params.mode()?;
    blocking(move || tracker.version_data(&project, &version, mode)).await
}

async fn category_data(
    State(tracker): State<Tracker>,
    Path((project, version, category)): Path<(String, String, String)>,
    Query(params): Query<DataParams>,
) -> Result<DataResponse, ProgressError> {
    let mode = params.mode()?;
    blocking(move || {
        tracker.category_data(&project, &version, &category, mode, &params.shield)
    })
    .await
}

async fn create_entries(
    State(tracker): State<Tracker>,
    Path((project, version)): Path<(String, String)>,
    body: Bytes,
) -> Result<WriteResponse, ProgressError> {
    let request = CreateEntriesRequest::from_json(&body)?;
    let wrote = blocking(move || tracker.create_entries(&project, &version, &request)).await?;

    Ok(WriteResponse {
        result: "success",
        wrote,
    })
}
