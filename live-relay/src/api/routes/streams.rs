//! Relay job routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::admission::OwnerJobs;
use crate::api::error::ApiResult;
use crate::api::models::{AdmissionResponse, OwnerQuery, OwnerRequest, RenameRequest};
use crate::api::server::AppState;
use crate::database::models::RelayJobDbModel;
use crate::domain::RelayRequest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_stream))
        .route("/{id}", axum::routing::put(rename_stream).delete(delete_stream))
        .route("/{id}/stop", post(stop_stream))
        .route("/{id}/start-now", post(start_now))
}

/// Routes keyed by owner.
pub fn owner_router() -> Router<AppState> {
    Router::new().route("/{owner_id}/streams", get(list_streams))
}

pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> ApiResult<(StatusCode, Json<AdmissionResponse>)> {
    let admission = state.admission.admit(&request).await?;
    Ok((StatusCode::CREATED, Json(admission.into())))
}

pub async fn list_streams(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<OwnerJobs>> {
    Ok(Json(state.admission.list(&owner_id).await?))
}

pub async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OwnerRequest>,
) -> ApiResult<Json<RelayJobDbModel>> {
    Ok(Json(state.admission.stop(&body.owner_id, &id).await?))
}

pub async fn start_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OwnerRequest>,
) -> ApiResult<Json<RelayJobDbModel>> {
    Ok(Json(state.admission.promote(&body.owner_id, &id).await?))
}

pub async fn rename_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> ApiResult<Json<RelayJobDbModel>> {
    Ok(Json(
        state
            .admission
            .rename(&body.owner_id, &id, &body.name)
            .await?,
    ))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state.admission.delete(&query.owner_id, &id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
