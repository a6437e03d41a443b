use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shardwatch_backend::{config::Config, create_app};
use shardwatch_db::{Database, StoreOptions};
use tempfile::TempDir;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-secret";
const INGEST_TOKEN: &str = "ingest-secret";

/// Helper to create test database
async fn setup_test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::open(dir.path(), StoreOptions::default())
        .await
        .expect("Failed to open database");
    (dir, db)
}

fn test_app(db: Database) -> axum::Router {
    let config = Config {
        admin_token: Some(ADMIN_TOKEN.to_string()),
        ingest_token: Some(INGEST_TOKEN.to_string()),
        ..Config::default()
    };
    create_app(db, &config)
}

/// Helper to send a request and get response
async fn send_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("x-forwarded-for", "127.0.0.1");

    if let Some(token) = auth_token {
        request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(json_body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json_body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes();

    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

#[tokio::test]
async fn test_error_response_format_for_unknown_player() {
    // GIVEN: An empty database
    let (_dir, db) = setup_test_db().await;
    let app = test_app(db);

    // WHEN: Requesting a player that was never seen
    let (status, body) = send_request(app, "GET", "/api/players/ghost", None, None).await;

    // THEN: Should return 404 with JSON error
    assert_eq!(status, StatusCode::NOT_FOUND);

    // AND: Error response should have proper structure
    assert!(body.get("error").is_some(), "Response should have 'error' field");
    assert!(body.get("details").is_none());
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("not found"),
        "Error message should be user-friendly"
    );
}

#[tokio::test]
async fn test_error_response_for_invalid_token() {
    // GIVEN: An empty database
    let (_dir, db) = setup_test_db().await;
    let app = test_app(db);

    // WHEN: Calling an admin route with a wrong token
    let (status, body) = send_request(
        app,
        "POST",
        "/api/admin/reset",
        None,
        Some("not-the-token"),
    )
    .await;

    // THEN: Should return 401 with JSON error
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // AND: Error response should be helpful
    let error_msg = body["error"].as_str().unwrap();
    assert!(
        error_msg.contains("bearer token"),
        "Error message: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_error_response_for_oversized_poll() {
    // GIVEN: A poll with more players than any shard holds
    let (_dir, db) = setup_test_db().await;
    let app = test_app(db);
    let players: Vec<Value> = (0..1001)
        .map(|i| json!({"id": format!("p{i}"), "name": "x", "monetaryValue": 1, "size": 10}))
        .collect();

    // WHEN: Ingesting it
    let (status, body) = send_request(
        app,
        "POST",
        "/api/ingest",
        Some(json!({"shard": "us-1", "players": players})),
        Some(INGEST_TOKEN),
    )
    .await;

    // THEN: Should return 400 with validation error
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // AND: Details should explain the problem
    assert_eq!(body["error"], "Invalid request");
    let details = body["details"].as_str().unwrap();
    assert!(
        details.contains("1000") && details.contains("1001"),
        "Details should mention the limit: {}",
        details
    );
}

#[tokio::test]
async fn test_validation_error_has_details() {
    // GIVEN: An empty database
    let (_dir, db) = setup_test_db().await;
    let app = test_app(db);

    // WHEN: Assigning a real name that is too long
    let (status, body) = send_request(
        app.clone(),
        "POST",
        "/api/admin/players/p1/real-name",
        Some(json!({"realName": "x".repeat(65)})),
        Some(ADMIN_TOKEN),
    )
    .await;

    // THEN: Error should be specific
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let details = body["details"].as_str().unwrap();
    assert!(details.contains("64"), "Should explain what's invalid: {}", details);

    // AND: A malformed player id is rejected the same way
    let (status, body) = send_request(app, "GET", "/api/players/bad!id", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("Player id"));
}

#[tokio::test]
async fn test_error_response_doesnt_expose_internals() {
    // GIVEN: A player file that cannot be parsed
    let (dir, db) = setup_test_db().await;
    std::fs::write(dir.path().join("p1.json"), b"{ not json").unwrap();
    let app = test_app(db);

    // WHEN: Requesting that player
    let (status, body) = send_request(app, "GET", "/api/players/p1", None, None).await;

    // THEN: The record is treated as absent
    assert_eq!(status, StatusCode::NOT_FOUND);

    let error_msg = body["error"].as_str().unwrap();

    // Should NOT contain internal error details
    assert!(!error_msg.contains("serde"), "Should not expose library names");
    assert!(!error_msg.contains("line"), "Should not expose parser positions");
    assert!(!error_msg.contains(".json"), "Should not expose file paths");

    // AND: The broken file was moved aside
    assert!(!dir.path().join("p1.json").exists());
    assert!(dir.path().join("p1.json.corrupt").exists());
}
