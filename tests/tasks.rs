mod common;

use axum::{
    body::Body,
    http::{Method, StatusCode},
};
use common::{TestApp, limits, limits_with_timeout, spawn_app, spawn_app_with};
use object_vault::services::account_service::IssuedCredentials;
use serde_json::{Value, json};
use std::time::Duration;

async fn dispatch(t: &TestApp, creds: &IssuedCredentials, uri: &str) -> (StatusCode, Value) {
    let resp = t.signed(Method::POST, uri, creds, Body::empty()).await;
    (resp.status, resp.json())
}

async fn file_names(t: &TestApp, creds: &IssuedCredentials, bucket: &str) -> Vec<String> {
    let uri = format!("/api/buckets/{bucket}/files?versions=true");
    let resp = t.signed(Method::GET, &uri, creds, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::OK);
    resp.json()["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["file_name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn empty_bucket_removes_every_file() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "scratch", "versioning": true}))
        .await;
    t.upload(&alice, "scratch", "a.txt", b"a1").await;
    t.upload(&alice, "scratch", "a.txt", b"a2").await;
    t.upload(&alice, "scratch", "b.txt", b"b").await;

    let (status, body) = dispatch(&t, &alice, "/api/tasks/empty-bucket/scratch").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert!(!body["message"].as_str().unwrap().is_empty());

    // Visible before any worker picked it up.
    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "running");
    assert_eq!(task["progress"], 0);

    assert_eq!(t.workers.drain().await.unwrap(), 1);

    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["progress"], 100);
    assert!(file_names(&t, &alice, "scratch").await.is_empty());
    let leftover = std::fs::read_dir(t.storage_dir.join("scratch")).unwrap().count();
    assert_eq!(leftover, 0);

    // The bucket itself stays and can now be deleted.
    let resp = t.signed(Method::DELETE, "/api/buckets/scratch", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn empty_bucket_with_no_files_completes() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "already-empty"})).await;

    let (_, body) = dispatch(&t, &alice, "/api/tasks/empty-bucket/already-empty").await;
    t.workers.drain().await.unwrap();
    let task = t.task(&alice, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["progress"], 100);
}

#[tokio::test]
async fn copy_bucket_creates_destination_with_identical_payloads() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(
        &alice,
        json!({"bucketName": "origin", "versioning": true, "acl": "public-read", "region": "eu-west-1", "quota": 1000}),
    )
    .await;
    t.upload(&alice, "origin", "one.txt", b"1").await;
    t.upload(&alice, "origin", "one.txt", b"11").await;
    t.upload(&alice, "origin", "two.txt", b"222").await;

    let (status, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/origin/replica").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_string();
    t.workers.drain().await.unwrap();

    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "completed", "{task}");
    assert_eq!(task["progress"], 100);

    let info = t
        .signed(Method::GET, "/api/buckets/replica", &alice, Body::empty())
        .await
        .json();
    assert_eq!(info["versioning_enabled"], true);
    assert_eq!(info["acl"], "public-read");
    assert_eq!(info["region"], "eu-west-1");
    assert_eq!(info["quota_bytes"], Value::Null);
    assert_eq!(info["file_count"], 3);
    assert_eq!(info["total_size"], 6);

    let src = t
        .signed(Method::GET, "/api/buckets/origin/files?versions=true", &alice, Body::empty())
        .await
        .json();
    let dest = t
        .signed(Method::GET, "/api/buckets/replica/files?versions=true", &alice, Body::empty())
        .await
        .json();
    let key = |f: &Value| {
        (
            f["file_name"].as_str().unwrap().to_string(),
            f["version_id"].as_str().unwrap().to_string(),
            f["is_latest"].as_bool().unwrap(),
            f["etag"].as_str().unwrap().to_string(),
            f["created_at"].as_str().unwrap().to_string(),
        )
    };
    let mut src_rows: Vec<_> = src["files"].as_array().unwrap().iter().map(key).collect();
    let mut dest_rows: Vec<_> = dest["files"].as_array().unwrap().iter().map(key).collect();
    src_rows.sort();
    dest_rows.sort();
    assert_eq!(src_rows, dest_rows);

    for (name, version, _, _, _) in &src_rows {
        let physical = format!("{version}_{name}");
        assert_eq!(
            std::fs::read(t.object_path("origin", &physical)).unwrap(),
            std::fs::read(t.object_path("replica", &physical)).unwrap()
        );
    }

    // Latest in the copy serves the same bytes as latest in the source.
    let resp = t
        .signed(Method::GET, "/api/buckets/replica/files/one.txt", &alice, Body::empty())
        .await;
    assert_eq!(&resp.body[..], b"11");
}

#[tokio::test]
async fn copying_again_does_not_duplicate_rows() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "src-bucket"})).await;
    t.upload(&alice, "src-bucket", "a.txt", b"a").await;
    t.upload(&alice, "src-bucket", "b.txt", b"b").await;

    dispatch(&t, &alice, "/api/tasks/copy-bucket/src-bucket/dst-bucket").await;
    t.workers.drain().await.unwrap();
    t.upload(&alice, "src-bucket", "c.txt", b"c").await;

    let (status, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/src-bucket/dst-bucket").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    t.workers.drain().await.unwrap();

    let task = t.task(&alice, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "completed");
    assert!(task["message"].as_str().unwrap().contains("2 already present"), "{task}");

    let mut names = file_names(&t, &alice, "dst-bucket").await;
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn failed_copy_attempt_leaves_nothing_behind_and_retry_succeeds() {
    let t = spawn_app_with(limits(0)).await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "fragile"})).await;
    t.upload(&alice, "fragile", "a.txt", b"a").await;
    t.upload(&alice, "fragile", "b.txt", b"b").await;
    t.upload(&alice, "fragile", "c.txt", b"c").await;

    // Payload of the last file goes missing: staging reads fail mid-way.
    let hidden = t.object_path("fragile", "c.txt");
    let parked = t.storage_dir.join("c.txt.parked");
    std::fs::rename(&hidden, &parked).unwrap();

    let (_, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/fragile/backup").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    t.workers.drain().await.unwrap();

    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "failed");
    assert!(!task["message"].as_str().unwrap().is_empty());
    let progress = task["progress"].as_i64().unwrap();
    assert!(progress > 0 && progress < 100, "{progress}");

    // Staged rows were never committed and staged payloads were removed.
    assert!(file_names(&t, &alice, "backup").await.is_empty());
    assert_eq!(std::fs::read_dir(t.storage_dir.join("backup")).unwrap().count(), 0);

    std::fs::rename(&parked, &hidden).unwrap();
    let (_, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/fragile/backup").await;
    t.workers.drain().await.unwrap();
    let task = t.task(&alice, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "completed");

    let mut names = file_names(&t, &alice, "backup").await;
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn task_fails_when_source_disappears_before_it_runs() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "short-lived"})).await;

    let (_, body) = dispatch(&t, &alice, "/api/tasks/empty-bucket/short-lived").await;
    let resp = t
        .signed(Method::DELETE, "/api/buckets/short-lived", &alice, Body::empty())
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    // Not retryable: one attempt and the task is failed.
    assert_eq!(t.workers.drain().await.unwrap(), 1);
    let task = t.task(&alice, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["message"], "bucket not found or not owned by user");
}

#[tokio::test]
async fn dispatch_rejections() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    let bob = t.user("bob@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "alice-src"})).await;
    t.create_bucket(&alice, json!({"bucketName": "alice-versioned", "versioning": true}))
        .await;
    t.create_bucket(&bob, json!({"bucketName": "bob-owned"})).await;

    let (status, body) = dispatch(&t, &bob, "/api/tasks/empty-bucket/alice-src").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "bucket not found or not owned by user");
    let (status, _) = dispatch(&t, &alice, "/api/tasks/empty-bucket/no-such-bucket").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = dispatch(&t, &alice, "/api/tasks/copy-bucket/alice-src/alice-src").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = dispatch(&t, &alice, "/api/tasks/copy-bucket/alice-src/bob-owned").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = dispatch(&t, &alice, "/api/tasks/copy-bucket/alice-src/alice-versioned").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = dispatch(&t, &bob, "/api/tasks/copy-bucket/alice-src/bob-copy").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let resp = t.anonymous(Method::POST, "/api/tasks/empty-bucket/alice-src", Body::empty()).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tasks_are_private_to_their_owner() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    let bob = t.user("bob@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "mine"})).await;
    let (_, body) = dispatch(&t, &alice, "/api/tasks/empty-bucket/mine").await;
    let task_id = body["task_id"].as_str().unwrap();

    let uri = format!("/api/tasks/{task_id}");
    let resp = t.signed(Method::GET, &uri, &bob, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = t
        .signed(
            Method::GET,
            "/api/tasks/00000000-0000-0000-0000-000000000000",
            &alice,
            Body::empty(),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let resp = t.signed(Method::GET, "/api/tasks/not-a-uuid", &alice, Body::empty()).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queue_retry_after_partial_copy_commits_each_file_once() {
    let t = spawn_app_with(limits(2)).await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "flaky"})).await;
    t.upload(&alice, "flaky", "a.txt", b"a").await;
    t.upload(&alice, "flaky", "b.txt", b"b").await;
    t.upload(&alice, "flaky", "c.txt", b"c").await;

    let hidden = t.object_path("flaky", "c.txt");
    let parked = t.storage_dir.join("c.txt.parked");
    std::fs::rename(&hidden, &parked).unwrap();

    let (_, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/flaky/mirror").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(t.workers.drain().await.unwrap(), 1);

    // Retries left: the task keeps running and nothing was committed.
    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "running", "{task}");
    assert!(task["progress"].as_i64().unwrap() < 100);
    assert!(file_names(&t, &alice, "mirror").await.is_empty());

    // Backoff has not elapsed yet.
    assert_eq!(t.workers.drain().await.unwrap(), 0);

    std::fs::rename(&parked, &hidden).unwrap();
    t.make_jobs_due().await;
    assert_eq!(t.workers.drain().await.unwrap(), 1);

    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "completed", "{task}");
    assert_eq!(task["progress"], 100);
    assert!(task["message"].as_str().unwrap().starts_with("copied 3 files"), "{task}");

    let mut names = file_names(&t, &alice, "mirror").await;
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[cfg(unix)]
#[tokio::test]
async fn timed_out_attempts_fail_the_task_once_retries_run_out() {
    let t = spawn_app_with(limits_with_timeout(1, Duration::from_secs(1))).await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "sluggish"})).await;
    t.upload(&alice, "sluggish", "a.txt", b"a").await;
    t.upload(&alice, "sluggish", "slow.bin", b"slow").await;

    // Reading a FIFO with no writer blocks until one shows up.
    let slow = t.object_path("sluggish", "slow.bin");
    std::fs::remove_file(&slow).unwrap();
    let made = std::process::Command::new("mkfifo").arg(&slow).status().unwrap();
    assert!(made.success());

    let (_, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/sluggish/sluggish-copy").await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    assert_eq!(t.workers.drain().await.unwrap(), 1);
    assert_eq!(t.task(&alice, &task_id).await["status"], "running");

    t.make_jobs_due().await;
    assert_eq!(t.workers.drain().await.unwrap(), 1);
    let task = t.task(&alice, &task_id).await;
    assert_eq!(task["status"], "failed");
    assert!(task["message"].as_str().unwrap().contains("timed out"), "{task}");
    assert_eq!(t.workers.drain().await.unwrap(), 0);

    // Release the reads still parked on the FIFO.
    let writer = tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new().write(true).open(&slow).map(drop)
    });
    let _ = tokio::time::timeout(Duration::from_secs(5), writer).await;
}

#[tokio::test]
async fn failed_commit_keeps_progress_below_100() {
    let t = spawn_app_with(limits(0)).await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "staged"})).await;
    t.upload(&alice, "staged", "a.txt", b"a").await;
    t.upload(&alice, "staged", "b.txt", b"b").await;

    t.execute_sql(
        "CREATE TRIGGER refuse_file_rows BEFORE INSERT ON files
         BEGIN SELECT RAISE(ABORT, 'file rows refused'); END",
    )
    .await;

    let (_, body) = dispatch(&t, &alice, "/api/tasks/copy-bucket/staged/staged-copy").await;
    t.workers.drain().await.unwrap();

    let task = t.task(&alice, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["progress"], 99);
    assert!(file_names(&t, &alice, "staged-copy").await.is_empty());
    assert_eq!(std::fs::read_dir(t.storage_dir.join("staged-copy")).unwrap().count(), 0);
}

#[tokio::test]
async fn task_is_failed_even_when_the_job_cannot_be_buried() {
    let t = spawn_app().await;
    let alice = t.user("alice@example.com").await;
    t.create_bucket(&alice, json!({"bucketName": "doomed"})).await;

    let (_, body) = dispatch(&t, &alice, "/api/tasks/empty-bucket/doomed").await;
    t.signed(Method::DELETE, "/api/buckets/doomed", &alice, Body::empty())
        .await;
    t.execute_sql(
        "CREATE TRIGGER refuse_dead_jobs BEFORE UPDATE OF status ON jobs
         WHEN NEW.status = 'dead'
         BEGIN SELECT RAISE(ABORT, 'jobs table unavailable'); END",
    )
    .await;

    assert!(t.workers.drain().await.is_err());
    let task = t.task(&alice, body["task_id"].as_str().unwrap()).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["message"], "bucket not found or not owned by user");
}
