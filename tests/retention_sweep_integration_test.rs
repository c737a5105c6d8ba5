//! Retention: idle rooms disappear with all their state; tombstones behind
//! the pruning horizon are dropped.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::*;
use livepaste::rooms::retention::RetentionSweeper;
use serde_json::json;

#[tokio::test]
async fn test_idle_room_is_swept_with_all_state() {
    let server = test_app().await;
    let app = &server.app;

    post(app, "/api/room/RM000050/files", file_payload("aa", "C1")).await;
    post(
        app,
        "/api/room/RM000050/ops",
        json!({ "file_path_hash": "aa", "op_encrypted": "d", "client_id": "A" }),
    )
    .await;
    post(app, "/api/room/RM000051/files", file_payload("bb", "C1")).await;

    // Age the first room past the retention window.
    let stale = Utc::now() - Duration::hours(25);
    sqlx::query("UPDATE rooms SET updated_at = ?1 WHERE id = 'RM000050'")
        .bind(stale)
        .execute(server.state.db.pool())
        .await
        .unwrap();

    let sweeper = RetentionSweeper::new(server.state.db.clone(), Arc::clone(&server.state.config));
    let stats = sweeper.sweep_once().await.unwrap();
    assert_eq!(stats.rooms_deleted, 1);

    // Cascade removed the room's files and operations.
    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE room_id = 'RM000050'")
        .fetch_one(server.state.db.pool())
        .await
        .unwrap();
    assert_eq!(files, 0);
    let ops: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM operations WHERE room_id = 'RM000050'")
            .fetch_one(server.state.db.pool())
            .await
            .unwrap();
    assert_eq!(ops, 0);

    // The fresh room is untouched.
    let (_, state) = get(app, "/api/room/RM000051").await;
    assert_eq!(state["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tombstones_behind_horizon_are_pruned() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000052";

    let (_, created) = post(app, &format!("{room}/files"), file_payload("aa", "C1")).await;
    let file_id = created["id"].as_str().unwrap().to_string();
    delete(app, &format!("{room}/files/{file_id}")).await;

    // March the room version far past the horizon.
    sqlx::query("UPDATE rooms SET version = version + 500 WHERE id = 'RM000052'")
        .execute(server.state.db.pool())
        .await
        .unwrap();

    let sweeper = RetentionSweeper::new(server.state.db.clone(), Arc::clone(&server.state.config));
    let stats = sweeper.sweep_once().await.unwrap();
    assert_eq!(stats.tombstones_pruned, 1);

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM deleted_files WHERE room_id = 'RM000052'")
            .fetch_one(server.state.db.pool())
            .await
            .unwrap();
    assert_eq!(remaining, 0);
}
