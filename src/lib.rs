//! Course Sync Server
//!
//! Keeps a local course → section → lesson → step tree in SQLite and
//! mirrors it onto a remote learning platform.

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod remote;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;
pub mod tree;

use state::AppState;

/// Build the HTTP application
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/v1/health", routes::health::router())
        .nest("/api/v1/nodes", routes::nodes::router())
        .nest("/api/v1/sync", routes::sync::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
