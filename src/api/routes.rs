//! # Router Assembly
//!
//! Splits the surface into a public router (room pages, presence probe,
//! password management) and a protected router wrapped by the room password
//! gate, then layers CORS and request tracing over the merge.

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::*;
use super::middleware::require_room_access;
use super::AppState;

/// Build the complete application router.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(root_redirect))
        .route("/room/:id", get(serve_client))
        .route("/api/room/:id/info", get(room_info))
        .route("/api/room/:id/password", post(set_password))
        .route("/api/room/:id/verify-password", post(verify_password));

    let protected = Router::new()
        .route("/api/room/:id", get(room_state).delete(delete_room))
        .route("/api/room/:id/version", get(room_version))
        .route("/api/room/:id/files", post(upsert_file))
        .route("/api/room/:id/files/:file_id", delete(delete_file))
        .route("/api/room/:id/files/:file_id/snapshot", post(snapshot_file))
        .route("/api/room/:id/sync", post(sync_bulk))
        .route("/api/room/:id/sync/begin", post(sync_begin))
        .route("/api/room/:id/sync/chunk", post(sync_chunk))
        .route("/api/room/:id/sync/complete", post(sync_complete))
        .route("/api/room/:id/ops", post(submit_op).get(fetch_ops))
        .route("/api/room/:id/changesets", post(create_changeset))
        .route(
            "/api/room/:id/changesets/:changeset_id/accept",
            post(accept_changeset),
        )
        .route(
            "/api/room/:id/changesets/:changeset_id/reject",
            post(reject_changeset),
        )
        .route("/api/room/:id/changes/:change_id/accept", post(accept_change))
        .route("/api/room/:id/changes/:change_id/reject", post(reject_change))
        .route_layer(from_fn_with_state(state.clone(), require_room_access));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
