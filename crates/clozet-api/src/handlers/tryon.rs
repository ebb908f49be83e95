//! Try-on job handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use clozet_models::{JobId, JobOptions, JobStatus};
use clozet_tryon::{JobView, RetryAccepted};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::security::{require_id, validate_options};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartTryonRequest {
    pub avatar_id: String,
    pub fit_id: String,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

#[derive(Debug, Serialize)]
pub struct StartTryonResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Start a try-on for one of the caller's avatars and fits.
pub async fn start_tryon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<StartTryonRequest>,
) -> ApiResult<Json<StartTryonResponse>> {
    require_id("avatar_id", &request.avatar_id)?;
    require_id("fit_id", &request.fit_id)?;
    let options = request.options.unwrap_or_default();
    validate_options(&options)?;

    let job = state
        .orchestrator
        .start(&user.uid, &request.avatar_id, &request.fit_id, options)
        .await?;

    Ok(Json(StartTryonResponse {
        job_id: job.id,
        status: job.status,
    }))
}

pub async fn get_tryon_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    require_id("job_id", &job_id)?;
    let view = state
        .status
        .get_status(&JobId::from_string(job_id), &user.uid)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct RetryTryonRequest {
    pub job_id: String,
}

/// Re-run a failed job.
pub async fn retry_tryon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<RetryTryonRequest>,
) -> ApiResult<Json<RetryAccepted>> {
    require_id("job_id", &request.job_id)?;
    let accepted = state
        .retry
        .retry(&JobId::from_string(request.job_id), &user.uid)
        .await?;
    Ok(Json(accepted))
}
