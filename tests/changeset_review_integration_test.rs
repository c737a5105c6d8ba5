//! Changeset review over HTTP: create, whole-changeset accept/reject,
//! per-change resolution, and the derived parent status.

mod common;

use common::*;
use serde_json::json;

fn changeset_payload() -> serde_json::Value {
    json!({
        "author_encrypted": "enc:author",
        "message_encrypted": "enc:message",
        "changes": [
            {
                "file_path_hash": "g1",
                "file_path_encrypted": "enc:g1",
                "new_content_encrypted": "N1",
            },
            {
                "file_path_hash": "g2",
                "file_path_encrypted": "enc:g2",
                "old_content_encrypted": "O2",
                "new_content_encrypted": "N2",
                "diff_encrypted": "D2",
            },
        ],
    })
}

#[tokio::test]
async fn test_partial_resolution() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000040";

    let (status, created) = post(app, &format!("{room}/changesets"), changeset_payload()).await;
    assert_eq!(status, 200);
    assert_eq!(created["status"], "pending");
    let changes = created["changes"].as_array().unwrap();
    let c1 = changes[0]["id"].as_str().unwrap().to_string();

    // Accept c1 only: the parent flips to partial with resolved_at set.
    let (status, body) = post(app, &format!("{room}/changes/{c1}/accept"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "partial");

    let (_, state) = get(app, room).await;
    assert_eq!(state_path_hashes(&state), vec!["g1"]);
    let g1 = &state["files"][0];
    assert_eq!(g1["content_encrypted"], "N1");

    // The changeset is still surfaced for review, g2 still pending.
    let open = state["changesets"].as_array().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["status"], "partial");
    assert!(!open[0]["resolved_at"].is_null());
    let g2_change = open[0]["changes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["file_path_hash"] == "g2")
        .unwrap();
    assert_eq!(g2_change["status"], "pending");
}

#[tokio::test]
async fn test_accept_whole_changeset() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000041";

    let (_, created) = post(app, &format!("{room}/changesets"), changeset_payload()).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = post(app, &format!("{room}/changesets/{id}/accept"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "accepted");

    let (_, state) = get(app, room).await;
    assert_eq!(state_path_hashes(&state), vec!["g1", "g2"]);
    // Accepted changesets no longer need attention.
    assert_eq!(state["changesets"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_reject_whole_changeset_touches_nothing() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000042";

    let (_, created) = post(app, &format!("{room}/changesets"), changeset_payload()).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = post(app, &format!("{room}/changesets/{id}/reject"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "rejected");

    let (_, state) = get(app, room).await;
    assert!(state["files"].as_array().unwrap().is_empty());
    assert_eq!(state["changesets"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_acceptance_overwrites_direct_write() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000043";

    post(app, &format!("{room}/files"), file_payload("g1", "direct")).await;
    let (_, created) = post(app, &format!("{room}/changesets"), changeset_payload()).await;
    let id = created["id"].as_str().unwrap();

    // Last writer wins: acceptance replaces the directly-written body.
    post(app, &format!("{room}/changesets/{id}/accept"), json!({})).await;

    let (_, state) = get(app, room).await;
    let g1 = state["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path_hash"] == "g1")
        .unwrap();
    assert_eq!(g1["content_encrypted"], "N1");
    // The acceptance re-stamped the row past the direct write.
    assert!(g1["version"].as_i64().unwrap() > 1);
}

#[tokio::test]
async fn test_unknown_ids_are_404() {
    let server = test_app().await;
    let app = &server.app;
    let room = "/api/room/RM000044";

    let (status, _) = post(app, &format!("{room}/changesets/missing/accept"), json!({})).await;
    assert_eq!(status, 404);
    let (status, _) = post(app, &format!("{room}/changes/missing/reject"), json!({})).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_empty_changeset_is_rejected() {
    let server = test_app().await;
    let app = &server.app;

    let (status, body) = post(
        app,
        "/api/room/RM000045/changesets",
        json!({ "changes": [] }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "validation");
}
