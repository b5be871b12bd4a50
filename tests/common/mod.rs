#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use object_vault::{
    auth::signature::{self, ACCESS_KEY_HEADER, EXPIRES_HEADER, SIGNATURE_HEADER},
    db,
    middleware::rate_limit::RateLimitConfig,
    queue::{EnqueueOptions, worker_pool::WorkerPool},
    services::{account_service::IssuedCredentials, task_dispatcher::TaskLimits},
    state::AppState,
};
use serde_json::Value;
use std::{path::PathBuf, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub workers: WorkerPool,
    pub storage_dir: PathBuf,
    _dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|err| {
            panic!(
                "body is not JSON ({err}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }
}

pub fn limits(max_retry: u32) -> TaskLimits {
    limits_with_timeout(max_retry, Duration::from_secs(30))
}

pub fn limits_with_timeout(max_retry: u32, timeout: Duration) -> TaskLimits {
    let opts = EnqueueOptions { max_retry, timeout };
    TaskLimits {
        empty: opts,
        copy: opts,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(limits(3)).await
}

pub async fn spawn_app_with(limits: TaskLimits) -> TestApp {
    spawn_configured(limits, RateLimitConfig::disabled()).await
}

pub async fn spawn_rate_limited(rate: RateLimitConfig) -> TestApp {
    spawn_configured(limits(3), rate).await
}

async fn spawn_configured(limits: TaskLimits, rate: RateLimitConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("meta/vault.db").display());
    let pool = db::connect(&url, 5).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let storage_dir = dir.path().join("objects");
    let (state, workers) =
        object_vault::build(pool, storage_dir.clone(), limits, Duration::from_millis(10), rate);
    TestApp {
        app: object_vault::app(state.clone()),
        state,
        workers,
        storage_dir,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn user(&self, email: &str) -> IssuedCredentials {
        self.state.accounts.create_user(email).await.unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn signed(
        &self,
        method: Method,
        uri: &str,
        creds: &IssuedCredentials,
        body: impl Into<Body>,
    ) -> TestResponse {
        self.send(signed_request(method, uri, creds, body)).await
    }

    pub async fn anonymous(&self, method: Method, uri: &str, body: impl Into<Body>) -> TestResponse {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap();
        self.send(req).await
    }

    pub async fn create_bucket(&self, creds: &IssuedCredentials, body: Value) -> TestResponse {
        let req = signed_builder(Method::POST, "/api/buckets", creds)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    pub async fn upload(
        &self,
        creds: &IssuedCredentials,
        bucket: &str,
        file: &str,
        data: &'static [u8],
    ) -> TestResponse {
        let uri = format!("/api/buckets/{bucket}/files/{file}");
        let req = signed_builder(Method::POST, &uri, creds)
            .header("content-type", "text/plain")
            .body(Body::from(data))
            .unwrap();
        self.send(req).await
    }

    pub async fn task(&self, creds: &IssuedCredentials, task_id: &str) -> Value {
        let resp = self
            .signed(Method::GET, &format!("/api/tasks/{task_id}"), creds, Body::empty())
            .await;
        assert_eq!(resp.status, StatusCode::OK, "{}", String::from_utf8_lossy(&resp.body));
        resp.json()
    }

    /// Pull every scheduled retry forward so the next drain picks it up.
    pub async fn make_jobs_due(&self) {
        sqlx::query("UPDATE jobs SET run_at = 0 WHERE status = 'pending'")
            .execute(self.state.store.pool())
            .await
            .unwrap();
    }

    pub async fn execute_sql(&self, sql: &str) {
        sqlx::query(sql).execute(self.state.store.pool()).await.unwrap();
    }

    pub fn object_path(&self, bucket: &str, physical_name: &str) -> PathBuf {
        self.storage_dir.join(bucket).join(physical_name)
    }
}

pub fn signed_builder(
    method: Method,
    uri: &str,
    creds: &IssuedCredentials,
) -> axum::http::request::Builder {
    let expires = Utc::now().timestamp() + 300;
    let sig = signature::sign_request(&creds.secret_key, method.as_str(), uri, expires);
    Request::builder()
        .method(method)
        .uri(uri)
        .header(ACCESS_KEY_HEADER, &creds.access_key)
        .header(SIGNATURE_HEADER, sig)
        .header(EXPIRES_HEADER, expires.to_string())
}

pub fn signed_request(
    method: Method,
    uri: &str,
    creds: &IssuedCredentials,
    body: impl Into<Body>,
) -> Request<Body> {
    signed_builder(method, uri, creds).body(body.into()).unwrap()
}
