mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use common::spawn_app;
use object_vault::{
    auth::signature::{self, ACCESS_KEY_HEADER, EXPIRES_HEADER, SIGNATURE_HEADER},
    services::account_service::IssuedCredentials,
};
use serde_json::json;

#[tokio::test]
async fn signed_request_creates_and_lists_buckets() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;

    let resp = t
        .create_bucket(&alice, json!({"bucketName": "photos", "region": "us-east-1"}))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let bucket = resp.json();
    assert_eq!(bucket["name"], "photos");
    assert_eq!(bucket["acl"], "private");
    assert_eq!(bucket["versioning_enabled"], false);
    assert!(t.storage_dir.join("photos").is_dir());

    let resp = t.signed(Method::GET, "/api/buckets", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let names: Vec<_> = resp.json()["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["photos"]);

    let resp = t.create_bucket(&alice, json!({"bucketName": "photos"})).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn method_case_and_trailing_slash_are_normalized() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;

    let expires = Utc::now().timestamp() + 60;
    let canonical = signature::request_canonical_string("get", "/api/auth/me///", expires);
    assert_eq!(canonical, format!("GET\n/api/auth/me\n{expires}"));

    let sig = signature::sign_request(&alice.secret_key, "get", "/api/auth/me/", expires);
    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/auth/me")
        .header(ACCESS_KEY_HEADER, &alice.access_key)
        .header(SIGNATURE_HEADER, sig)
        .header(EXPIRES_HEADER, expires.to_string())
        .body(Body::empty())
        .unwrap();
    assert_eq!(t.send(req).await.status, StatusCode::OK);
}

#[tokio::test]
async fn missing_partial_and_bad_signatures_are_rejected() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;

    let resp = t.anonymous(Method::GET, "/api/buckets", Body::empty()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json()["status"], 401);

    let req = Request::builder()
        .uri("/api/buckets")
        .header(ACCESS_KEY_HEADER, &alice.access_key)
        .body(Body::empty())
        .unwrap();
    assert_eq!(t.send(req).await.status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/buckets")
        .header(ACCESS_KEY_HEADER, &alice.access_key)
        .header(SIGNATURE_HEADER, "00")
        .header(EXPIRES_HEADER, "tomorrow")
        .body(Body::empty())
        .unwrap();
    assert_eq!(t.send(req).await.status, StatusCode::UNAUTHORIZED);

    // Signed for a different path.
    let expires = Utc::now().timestamp() + 60;
    let sig = signature::sign_request(&alice.secret_key, "GET", "/api/auth/me", expires);
    let req = Request::builder()
        .uri("/api/buckets")
        .header(ACCESS_KEY_HEADER, &alice.access_key)
        .header(SIGNATURE_HEADER, sig)
        .header(EXPIRES_HEADER, expires.to_string())
        .body(Body::empty())
        .unwrap();
    assert_eq!(t.send(req).await.status, StatusCode::UNAUTHORIZED);

    // Expired.
    let expires = Utc::now().timestamp() - 1;
    let sig = signature::sign_request(&alice.secret_key, "GET", "/api/buckets", expires);
    let req = Request::builder()
        .uri("/api/buckets")
        .header(ACCESS_KEY_HEADER, &alice.access_key)
        .header(SIGNATURE_HEADER, sig)
        .header(EXPIRES_HEADER, expires.to_string())
        .body(Body::empty())
        .unwrap();
    let resp = t.send(req).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json()["error"], "invalid or expired signature");

    // Unknown access key.
    let expires = Utc::now().timestamp() + 60;
    let sig = signature::sign_request(&alice.secret_key, "GET", "/api/buckets", expires);
    let req = Request::builder()
        .uri("/api/buckets")
        .header(ACCESS_KEY_HEADER, "nobody")
        .header(SIGNATURE_HEADER, sig)
        .header(EXPIRES_HEADER, expires.to_string())
        .body(Body::empty())
        .unwrap();
    assert_eq!(t.send(req).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn other_users_bucket_is_forbidden() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    let bob = t.user("bob@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "alice-data"})).await;

    for (method, uri) in [
        (Method::GET, "/api/buckets/alice-data"),
        (Method::GET, "/api/buckets/alice-data/files"),
        (Method::DELETE, "/api/buckets/alice-data"),
    ] {
        let resp = t.signed(method.clone(), uri, &bob, Body::empty()).await;
        assert_eq!(resp.status, StatusCode::FORBIDDEN, "{method} {uri}");
    }

    let resp = t.signed(Method::GET, "/api/buckets/alice-data", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let info = resp.json();
    assert_eq!(info["file_count"], 0);
    assert_eq!(info["total_size"], 0);

    let resp = t.signed(Method::GET, "/api/buckets/nope-nope", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn me_hides_secret_and_rotation_replaces_keys() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;

    let resp = t.signed(Method::GET, "/api/auth/me", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let me = resp.json();
    assert_eq!(me["email"], "alice@example.com");
    assert!(me.get("secret_key").is_none());

    let resp = t.signed(Method::POST, "/api/auth/rotate-keys", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    let rotated = IssuedCredentials {
        user_id: alice.user_id,
        email: alice.email.clone(),
        access_key: body["access_key"].as_str().unwrap().to_string(),
        secret_key: body["secret_key"].as_str().unwrap().to_string(),
    };
    assert_ne!(rotated.secret_key, alice.secret_key);

    let resp = t.signed(Method::GET, "/api/auth/me", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    let resp = t.signed(Method::GET, "/api/auth/me", &rotated, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn bucket_validation_errors() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;

    for body in [
        json!({"bucketName": "No"}),
        json!({"bucketName": "192.168.0.1"}),
        json!({"bucketName": "fine-name", "region": "mars-north-1"}),
        json!({"bucketName": "fine-name", "quota": 0}),
    ] {
        let resp = t.create_bucket(&alice, body.clone()).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn health_endpoints_need_no_auth() {
    let t = spawn_app().await;
    let resp = t.anonymous(Method::GET, "/healthz", Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = t.anonymous(Method::GET, "/readyz", Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}
