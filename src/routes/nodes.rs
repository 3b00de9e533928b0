//! Local authoring endpoints
//!
//! Edit the local tree only. Changes reach the remote platform through the
//! sync endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::tree::{NewNode, Node, NodeKind, Payload};

/// Create the node router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses).post(create_node))
        .route("/:id", get(get_node).delete(delete_node))
        .route("/:id/children", get(list_children))
        .route("/:id/position", put(move_node))
        .route("/:id/payload", put(update_payload))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub position: i32,
}

async fn load(state: &AppState, id: i64) -> Result<Node> {
    state
        .store()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Node {}", id)))
}

async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Node>>> {
    let courses = state
        .store()
        .find_siblings_ordered(NodeKind::Course, None)
        .await?;
    Ok(Json(courses))
}

async fn create_node(
    State(state): State<AppState>,
    Json(req): Json<NewNode>,
) -> Result<(StatusCode, Json<Node>)> {
    let node = state.store().insert(req).await?;
    tracing::info!("Created {} {} at {}", node.kind(), node.local_id, node.position);
    Ok((StatusCode::CREATED, Json(node)))
}

async fn get_node(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Node>> {
    Ok(Json(load(&state, id).await?))
}

async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Node>>> {
    let node = load(&state, id).await?;
    Ok(Json(state.store().children(&node).await?))
}

async fn move_node(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<Node>> {
    if req.position < 1 {
        return Err(AppError::BadRequest("Positions start at 1".to_string()));
    }
    Ok(Json(state.store().move_node(id, req.position).await?))
}

async fn update_payload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<Payload>,
) -> Result<Json<Node>> {
    Ok(Json(state.store().update_payload(id, payload).await?))
}

/// Delete locally, with the whole subtree. Refused while anything in the
/// subtree is linked, since its remote counterpart would be orphaned.
async fn delete_node(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    let node = load(&state, id).await?;
    if let Some(linked) = first_synced(&state, node).await? {
        return Err(AppError::Conflict(format!(
            "{} {} is linked to remote {}; delete it through /api/v1/sync/nodes/{} or /api/v1/sync/subtrees/{}",
            linked.kind(),
            linked.local_id,
            linked.remote_id.unwrap_or_default(),
            linked.local_id,
            id
        )));
    }
    state.store().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// First linked node in the subtree rooted at `root`, if any
async fn first_synced(state: &AppState, root: Node) -> Result<Option<Node>> {
    let mut pending = vec![root];
    while let Some(node) = pending.pop() {
        if node.is_synced() {
            return Ok(Some(node));
        }
        pending.extend(state.store().children(&node).await?);
    }
    Ok(None)
}
