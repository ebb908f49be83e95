//! Credit balance and plan handlers.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use clozet_models::{CreditCheck, CreditInfo};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Stored balance.
pub async fn get_credits(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CreditInfo>> {
    Ok(Json(state.credits.get_credits(&user.uid).await?))
}

/// Whether another try-on is allowed, rolling the period over if due.
pub async fn check_credits(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CreditCheck>> {
    Ok(Json(state.credits.check_credits(&user.uid).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan: String,
}

pub async fn update_plan(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdatePlanRequest>,
) -> ApiResult<Json<CreditInfo>> {
    let info = state
        .credits
        .update_plan(&user.uid, request.plan.trim())
        .await?;
    Ok(Json(info))
}
