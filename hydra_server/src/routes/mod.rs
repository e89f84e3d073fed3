//! Hydra HTTP routes: submissions, operator actions, site listing.

pub mod api;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use crate::error::HydraError;
use crate::models::NewSubmission;
use crate::services::orchestrator::Hydra;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct HydraRouterState {
    pub hydra: Arc<Hydra>,
}

/// Build the Hydra Axum router.
pub fn hydra_router(state: HydraRouterState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Submission API
        .route("/api/submissions", get(list_submissions).post(submit))
        .route("/api/submissions/{id}", get(get_submission))
        .route("/api/submissions/{id}/kill", post(kill))
        .route("/api/submissions/{id}/rebuild", post(rebuild))
        // Public listing
        .route("/api/sites", get(list_sites))
        .with_state(state)
}

fn status_for(error: &HydraError) -> StatusCode {
    match error {
        HydraError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log_and_map(action: &'static str) -> impl Fn(HydraError) -> StatusCode {
    move |e| {
        let status = status_for(&e);
        if status.is_server_error() {
            tracing::error!("{action} error: {e}");
        } else {
            tracing::debug!("{action} rejected: {e}");
        }
        status
    }
}

async fn health() -> &'static str {
    "ok"
}

// ── Submission API ──

async fn submit(
    State(state): State<HydraRouterState>,
    Json(req): Json<api::SubmitRequest>,
) -> Result<(StatusCode, Json<api::SubmitResponse>), StatusCode> {
    state
        .hydra
        .submit(NewSubmission {
            repository: req.repository,
            branch: req.branch,
        })
        .await
        .map(|s| {
            (
                StatusCode::CREATED,
                Json(api::SubmitResponse {
                    id: s.id,
                    status: s.status,
                }),
            )
        })
        .map_err(log_and_map("Submit"))
}

async fn list_submissions(
    State(state): State<HydraRouterState>,
) -> Result<Json<Vec<api::SubmissionJson>>, StatusCode> {
    let host = state.hydra.config().host_name.clone();
    state
        .hydra
        .list()
        .await
        .map(|all| {
            Json(
                all.into_iter()
                    .map(|s| api::SubmissionJson::from_submission(s, &host))
                    .collect(),
            )
        })
        .map_err(log_and_map("List submissions"))
}

async fn get_submission(
    State(state): State<HydraRouterState>,
    Path(id): Path<i64>,
) -> Result<Json<api::SubmissionJson>, StatusCode> {
    let host = &state.hydra.config().host_name;
    state
        .hydra
        .get(id)
        .await
        .map(|s| Json(api::SubmissionJson::from_submission(s, host)))
        .map_err(log_and_map("Get submission"))
}

async fn kill(
    State(state): State<HydraRouterState>,
    Path(id): Path<i64>,
) -> Result<Json<api::SubmissionJson>, StatusCode> {
    let host = &state.hydra.config().host_name;
    state
        .hydra
        .kill(id)
        .await
        .map(|s| Json(api::SubmissionJson::from_submission(s, host)))
        .map_err(log_and_map("Kill"))
}

async fn rebuild(
    State(state): State<HydraRouterState>,
    Path(id): Path<i64>,
) -> Result<Json<api::SubmissionJson>, StatusCode> {
    let host = &state.hydra.config().host_name;
    state
        .hydra
        .rebuild(id)
        .await
        .map(|s| Json(api::SubmissionJson::from_submission(s, host)))
        .map_err(log_and_map("Rebuild"))
}

// ── Sites ──

async fn list_sites(
    State(state): State<HydraRouterState>,
) -> Result<Json<Vec<api::SiteJson>>, StatusCode> {
    let host = &state.hydra.config().host_name;
    state
        .hydra
        .sites()
        .await
        .map(|sites| {
            Json(
                sites
                    .iter()
                    .filter_map(|s| api::SiteJson::from_submission(s, host))
                    .collect(),
            )
        })
        .map_err(log_and_map("List sites"))
}
