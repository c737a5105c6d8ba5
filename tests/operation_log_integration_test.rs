//! Operation log over HTTP: sequencing, conflict detection, fetch paging,
//! and snapshot compaction.

mod common;

use common::*;
use serde_json::json;

fn op(file: &str, client: &str, base_version: i64) -> serde_json::Value {
    json!({
        "file_path_hash": file,
        "op_encrypted": format!("op-{client}"),
        "client_id": client,
        "base_version": base_version,
    })
}

#[tokio::test]
async fn test_concurrent_edit_conflict() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000030";

    post(app, &format!("{room}/files"), file_payload("f1", "C1")).await;

    // Client A lands first.
    let (status, body) = post(app, &format!("{room}/ops"), op("f1", "A", 1)).await;
    assert_eq!(status, 200);
    assert_eq!(body["seq"], 1);
    assert_eq!(body["current_version"], 2);

    // Client B raced A from the same base version and must rebase.
    let (status, body) = post(app, &format!("{room}/ops"), op("f1", "B", 1)).await;
    assert_eq!(status, 409);
    assert_eq!(body["current_version"], 2);
    assert_eq!(body["base_version"], 1);
    let conflicts = body["conflicting_ops"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["seq"], 1);
    assert_eq!(conflicts[0]["client_id"], "A");

    // After rebasing onto the current version, B is accepted with the next seq.
    let (status, body) = post(app, &format!("{room}/ops"), op("f1", "B", 2)).await;
    assert_eq!(status, 200);
    assert_eq!(body["seq"], 2);
}

#[tokio::test]
async fn test_ops_fetch_is_ordered_and_filterable() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000031";

    post(app, &format!("{room}/files"), file_payload("f1", "C1")).await;
    post(app, &format!("{room}/files"), file_payload("f2", "C2")).await;

    for i in 0..3 {
        post(app, &format!("{room}/ops"), op("f1", "A", 1 + i)).await;
    }
    post(app, &format!("{room}/ops"), op("f2", "A", 1)).await;

    let (status, body) = get(app, &format!("{room}/ops?since=0")).await;
    assert_eq!(status, 200);
    let ops = body["ops"].as_array().unwrap();
    assert_eq!(ops.len(), 4);
    let seqs: Vec<i64> = ops.iter().map(|o| o["seq"].as_i64().unwrap()).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert_eq!(body["op_seq"], 4);
    assert_eq!(body["has_more"], false);

    let (_, body) = get(app, &format!("{room}/ops?since=0&file=f2")).await;
    let ops = body["ops"].as_array().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0]["file_path_hash"], "f2");

    let (_, body) = get(app, &format!("{room}/ops?since=3")).await;
    assert_eq!(body["ops"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_snapshot_compacts_the_log() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000032";

    post(app, &format!("{room}/files"), file_payload("other", "C")).await;
    post(app, &format!("{room}/files"), file_payload("f2", "C")).await;

    // Burn a few sequence numbers on another file first.
    for i in 0..3 {
        post(app, &format!("{room}/ops"), op("other", "A", 1 + i)).await;
    }
    // Then a run of edits on f2, yielding seqs 4..=8.
    for i in 0..5 {
        post(app, &format!("{room}/ops"), op("f2", "A", 1 + i)).await;
    }

    let (status, body) = post(
        app,
        &format!("{room}/files/f2/snapshot"),
        json!({ "content_encrypted": "materialized", "through_seq": 8 }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["snapshot_seq"], 8);

    // Every covered op is gone.
    let (_, body) = get(app, &format!("{room}/ops?since=3&file=f2")).await;
    assert_eq!(body["ops"].as_array().unwrap().len(), 0);

    // Ops on the other file survive.
    let (_, body) = get(app, &format!("{room}/ops?since=0")).await;
    assert_eq!(body["ops"].as_array().unwrap().len(), 3);

    // The file row carries the compacted body and the new snapshot floor.
    let (_, state) = get(app, room).await;
    let f2 = state["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path_hash"] == "f2")
        .unwrap();
    assert_eq!(f2["content_encrypted"], "materialized");
    assert_eq!(f2["snapshot_seq"], 8);
}

#[tokio::test]
async fn test_snapshot_unknown_file_is_404() {
    let server = test_app().await;

    let (status, _) = post(
        &server.app,
        "/api/room/RM000033/files/ghost/snapshot",
        json!({ "content_encrypted": "x", "through_seq": 1 }),
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_ops_on_untracked_file_are_accepted() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000034";

    // No file row yet; the op is logged against the future file.
    let (status, body) = post(
        app,
        &format!("{room}/ops"),
        json!({
            "file_path_hash": "fresh",
            "op_encrypted": "delta",
            "client_id": "A",
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["seq"], 1);
    assert_eq!(body["current_version"], 1);
}
