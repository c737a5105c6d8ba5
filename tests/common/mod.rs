//! Shared fixtures for the API integration tests: a router over a
//! throwaway on-disk database, plus JSON request helpers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tower::ServiceExt;

use livepaste::{router, AppState, ServerConfig};

/// A router wired to a temporary database, plus the state behind it.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _tmp: TempDir,
}

/// Boot a fresh server against a throwaway database.
pub async fn test_app() -> TestApp {
    let tmp = TempDir::new().expect("tempdir");
    let config = ServerConfig {
        database_url: format!("sqlite://{}/test.db", tmp.path().display()),
        ..ServerConfig::default()
    };
    let state = AppState::connect(config).await.expect("connect");
    TestApp {
        app: router(state.clone()),
        state,
        _tmp: tmp,
    }
}

/// Issue one request and decode the JSON response body.
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    password: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(digest) = password {
        builder = builder.header("X-Room-Password", digest);
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None, None).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body), None).await
}

pub async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::DELETE, uri, None, None).await
}

/// Hex SHA-256 digest, as the browser computes for passwords.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Upsert payload for a syncable file.
pub fn file_payload(path_hash: &str, content: &str) -> Value {
    serde_json::json!({
        "path_hash": path_hash,
        "path_encrypted": format!("enc:{path_hash}"),
        "content_encrypted": content,
        "is_syncable": true,
    })
}

/// Path hashes of the files in a state response, sorted.
pub fn state_path_hashes(state: &Value) -> Vec<String> {
    let mut hashes: Vec<String> = state["files"]
        .as_array()
        .expect("files array")
        .iter()
        .map(|f| f["path_hash"].as_str().unwrap().to_string())
        .collect();
    hashes.sort();
    hashes
}
