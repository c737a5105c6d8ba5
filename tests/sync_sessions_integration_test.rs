//! Chunked sync sessions: begin/chunk/complete, reconciliation deletes,
//! version accounting, and the single-shot bulk endpoint.

mod common;

use common::*;
use serde_json::json;

#[tokio::test]
async fn test_chunked_sync_reconciliation() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000020";

    // Pre-state: x, y, z.
    for hash in ["x", "y", "z"] {
        post(app, &format!("{room}/files"), file_payload(hash, "old")).await;
    }
    let (_, state) = get(app, room).await;
    let pre_version = state["version"].as_i64().unwrap();
    assert_eq!(pre_version, 3);

    let (status, body) = post(
        app,
        &format!("{room}/sync/begin"),
        json!({ "client_id": "client-a", "total_chunks": 2, "total_files": 3 }),
    )
    .await;
    assert_eq!(status, 200);
    let token = body["session_token"].as_str().unwrap().to_string();
    assert_eq!(body["expires_in"], 300);

    // Chunk 0 carries x and the new file w.
    let (status, body) = post(
        app,
        &format!("{room}/sync/chunk"),
        json!({
            "session_token": token,
            "chunk_index": 0,
            "files": [file_payload("x", "new"), file_payload("w", "new")],
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["chunks_remaining"], 1);

    // Chunk 1 carries y.
    let (status, body) = post(
        app,
        &format!("{room}/sync/chunk"),
        json!({
            "session_token": token,
            "chunk_index": 1,
            "files": [file_payload("y", "new")],
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["chunks_remaining"], 0);

    let (status, state) = post(
        app,
        &format!("{room}/sync/complete"),
        json!({ "session_token": token }),
    )
    .await;
    assert_eq!(status, 200);

    // z was never observed, so reconciliation removed it.
    assert_eq!(state_path_hashes(&state), vec!["w", "x", "y"]);

    // One bump per chunk plus one for the reconciliation.
    assert_eq!(state["version"].as_i64().unwrap(), pre_version + 3);

    let (_, delta) = get(app, &format!("{room}?since={}", pre_version + 2)).await;
    assert_eq!(delta["deleted_path_hashes"][0], "z");

    // The consumed session is gone.
    let (status, _) = post(
        app,
        &format!("{room}/sync/complete"),
        json!({ "session_token": token }),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_complete_without_deletions_keeps_version() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000021";

    post(app, &format!("{room}/files"), file_payload("x", "old")).await;

    let (_, body) = post(
        app,
        &format!("{room}/sync/begin"),
        json!({ "client_id": "client-a", "total_chunks": 1, "total_files": 1 }),
    )
    .await;
    let token = body["session_token"].as_str().unwrap().to_string();

    post(
        app,
        &format!("{room}/sync/chunk"),
        json!({ "session_token": token, "chunk_index": 0, "files": [file_payload("x", "new")] }),
    )
    .await;

    let (_, state) = post(
        app,
        &format!("{room}/sync/complete"),
        json!({ "session_token": token }),
    )
    .await;

    // Upsert + chunk, and no reconciliation bump.
    assert_eq!(state["version"], 2);
    assert_eq!(state_path_hashes(&state), vec!["x"]);
}

#[tokio::test]
async fn test_unknown_session_token_is_session_expired() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000022";

    let (status, body) = post(
        app,
        &format!("{room}/sync/chunk"),
        json!({ "session_token": "bogus", "chunk_index": 0, "files": [] }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "session_expired");

    let (status, _) = post(
        app,
        &format!("{room}/sync/complete"),
        json!({ "session_token": "bogus" }),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_session_is_bound_to_its_room() {
    let server = test_app().await;
    let app = &server.app;

    let (_, body) = post(
        app,
        "/api/room/RM000023/sync/begin",
        json!({ "client_id": "client-a", "total_chunks": 1, "total_files": 1 }),
    )
    .await;
    let token = body["session_token"].as_str().unwrap().to_string();

    let (status, _) = post(
        app,
        "/api/room/RM999999/sync/chunk",
        json!({ "session_token": token, "chunk_index": 0, "files": [] }),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_single_shot_bulk_sync() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000024";

    for hash in ["x", "y"] {
        post(app, &format!("{room}/files"), file_payload(hash, "old")).await;
    }

    let (status, state) = post(
        app,
        &format!("{room}/sync"),
        json!({
            "client_id": "client-a",
            "files": [file_payload("x", "new"), file_payload("w", "new")],
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(state_path_hashes(&state), vec!["w", "x"]);

    // 2 upserts + bulk chunk + reconciliation.
    assert_eq!(state["version"], 4);
}
