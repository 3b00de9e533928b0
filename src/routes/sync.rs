//! Sync API endpoints
//!
//! Mirror local nodes and subtrees to the remote platform, or pull remote
//! subtrees into the local store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::ActingUser;
use crate::error::{AppError, Result};
use crate::remote::RemoteNode;
use crate::state::AppState;
use crate::sync::{CascadeReport, PullReport, SyncOutcome};
use crate::tree::NodeKind;

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/nodes/:id",
            post(sync_node).put(update_node).delete(delete_node),
        )
        .route("/subtrees/:id", post(sync_subtree).delete(delete_subtree))
        .route("/pull/:kind/:remote_id", post(pull_subtree))
        .route("/remote/:kind/:remote_id", get(fetch_remote))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncNodeRequest {
    pub captcha_token: Option<String>,
}

fn parse_kind(kind: &str) -> Result<NodeKind> {
    kind.parse()
        .map_err(|e| AppError::BadRequest(format!("{}", e)))
}

/// Create a node remotely. A pending challenge answers 202.
async fn sync_node(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path(id): Path<i64>,
    body: Option<Json<SyncNodeRequest>>,
) -> Result<Response> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let outcome = state.engine().sync_node(&ctx, id, req.captcha_token).await?;

    let status = match outcome {
        SyncOutcome::Synced { .. } => StatusCode::OK,
        SyncOutcome::ChallengeRequired { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)).into_response())
}

async fn update_node(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path(id): Path<i64>,
) -> Result<Json<RemoteNode>> {
    Ok(Json(state.engine().update_node(&ctx, id).await?))
}

async fn delete_node(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.engine().delete_node(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_subtree(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path(id): Path<i64>,
) -> Result<Json<CascadeReport>> {
    Ok(Json(state.engine().sync_subtree(&ctx, id).await?))
}

async fn delete_subtree(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path(id): Path<i64>,
) -> Result<Json<CascadeReport>> {
    Ok(Json(state.engine().delete_subtree(&ctx, id).await?))
}

async fn pull_subtree(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path((kind, remote_id)): Path<(String, i64)>,
) -> Result<Json<PullReport>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.engine().pull_subtree(&ctx, kind, remote_id).await?))
}

async fn fetch_remote(
    State(state): State<AppState>,
    ActingUser(ctx): ActingUser,
    Path((kind, remote_id)): Path<(String, i64)>,
) -> Result<Json<RemoteNode>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.engine().fetch_remote(&ctx, kind, remote_id).await?))
}
