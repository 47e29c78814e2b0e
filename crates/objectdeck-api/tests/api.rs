//! HTTP surface integration tests
//!
//! Drives the assembled router with an in-memory provider: profile CRUD,
//! upload session modes, the staging pipeline end to end, and auth.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use objectdeck_api::{AppState, AuthConfig, MetaLimits};
use objectdeck_common::{DataLayout, JobId, ProviderKind};
use objectdeck_engine::EngineDriver;
use objectdeck_events::EventBus;
use objectdeck_jobs::{Connector, Scheduler, SchedulerConfig};
use objectdeck_providers::memory::MemoryProvider;
use objectdeck_providers::ObjectStore;
use objectdeck_store::Store;
use objectdeck_uploads::{UploadConfig, UploadManager};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct TestServer {
    app: Router,
    store: Store,
    provider: Arc<MemoryProvider>,
    _tmp: tempfile::TempDir,
}

fn setup(api_token: Option<&str>) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(tmp.path());
    layout.ensure().unwrap();
    let store = Store::open_in_memory(None).unwrap();
    let bus = EventBus::new();
    let engine = EngineDriver::new(None, layout.clone(), 1024 * 1024);
    let provider = MemoryProvider::new();
    let provider_for_connector = Arc::clone(&provider);
    let connector: Connector = Arc::new(move |_, _| {
        Ok(Box::new(Arc::clone(&provider_for_connector)) as Box<dyn ObjectStore>)
    });

    let scheduler = Scheduler::new(
        store.clone(),
        Arc::clone(&bus),
        engine.clone(),
        SchedulerConfig {
            concurrency: 1,
            ..SchedulerConfig::default()
        },
    )
    .unwrap()
    .with_connector(Arc::clone(&connector));
    Arc::clone(&scheduler).start();

    let uploads = UploadManager::new(
        store.clone(),
        layout,
        Arc::clone(&scheduler),
        Arc::clone(&connector),
        UploadConfig::default(),
    );

    let state = Arc::new(AppState {
        store: store.clone(),
        bus,
        scheduler,
        uploads,
        engine,
        connector,
        auth: AuthConfig {
            api_token: api_token.map(String::from),
            allow_remote: false,
            allowed_hosts: vec![],
        },
        limits: MetaLimits {
            upload_max_bytes: 1024 * 1024,
            upload_ttl_seconds: 3600,
            job_concurrency: 1,
            job_log_max_bytes: 1024 * 1024,
            direct_stream: true,
        },
        engine_version: None,
        shutdown: CancellationToken::new(),
    });

    TestServer {
        app: objectdeck_api::router(state, None),
        store,
        provider,
        _tmp: tmp,
    }
}

async fn call(server: &TestServer, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = server
        .app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_profile(server: &TestServer, provider: &str) -> String {
    let (status, body) = call(
        server,
        "POST",
        "/api/profiles",
        Some(json!({
            "name": format!("{provider}-profile"),
            "provider": provider,
            "config": {"endpoint": "http://mem", "accountName": "acct"},
            "secrets": {
                "accessKeyId": "AKID",
                "secretAccessKey": "shh",
                "sessionToken": "tok",
            },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "profile create failed: {body}");
    body["id"].as_str().unwrap().to_string()
}

async fn wait_job(store: &Store, id: &str) -> objectdeck_store::JobRecord {
    let id: JobId = id.parse().unwrap();
    for _ in 0..300 {
        let job = store.get_job(id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never finished");
}

#[tokio::test]
async fn test_profile_responses_redact_secrets() {
    let server = setup(None);
    let id = create_profile(&server, "s3_compatible").await;

    let (status, list) = call(&server, "GET", "/api/profiles", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert!(list[0].get("secrets").is_none());

    // The secrets endpoint round-trips every field, sessionToken included.
    let (status, secrets) =
        call(&server, "GET", &format!("/api/profiles/{id}/secrets"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(secrets["accessKeyId"], "AKID");
    assert_eq!(secrets["secretAccessKey"], "shh");
    assert_eq!(secrets["sessionToken"], "tok");
}

#[tokio::test]
async fn test_presigned_mode_on_azure_falls_back_to_staging() {
    let server = setup(None);
    let id = create_profile(&server, "azure_blob").await;

    let (status, body) = call(
        &server,
        "POST",
        "/api/uploads",
        Some(json!({"profileId": id, "bucket": "b", "mode": "presigned"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "not_supported");
    assert!(body["error"]["message"].as_str().unwrap().contains("presigned"));

    let (status, _) = call(
        &server,
        "POST",
        "/api/uploads",
        Some(json!({"profileId": id, "bucket": "b", "mode": "staging"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_staging_upload_pipeline() {
    let server = setup(None);
    let id = create_profile(&server, "s3_compatible").await;

    let (status, session) = call(
        &server,
        "POST",
        "/api/uploads",
        Some(json!({"profileId": id, "bucket": "b", "prefix": "", "mode": "staging"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = session["id"].as_str().unwrap().to_string();
    let staging_dir = session["stagingDir"].as_str().unwrap().to_string();

    // One multipart form part whose filename is the object key.
    let boundary = "deckboundary";
    let form = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         hello\r\n\
         --{boundary}--\r\n"
    );
    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/uploads/{session_id}/files"))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, job) = call(
        &server,
        "POST",
        &format!("/api/uploads/{session_id}/commit"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job = wait_job(&server.store, job["id"].as_str().unwrap()).await;
    assert_eq!(job.status, objectdeck_common::JobStatus::Succeeded);

    // Object landed, session and staging directory are gone.
    let (status, listing) = call(
        &server,
        "GET",
        &format!("/api/profiles/{id}/buckets/b/objects?prefix="),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let objects = listing["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0]["key"], "hello.txt");
    assert_eq!(objects[0]["size"], 5);
    assert!(!std::path::Path::new(&staging_dir).exists());

    let (status, _) = call(
        &server,
        "GET",
        &format!("/api/uploads/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let server = setup(Some("s3cret"));
    let (status, body) = call(&server, "GET", "/api/profiles", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/profiles")
                .header("x-api-token", "s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_meta_reports_capabilities_and_limits() {
    let server = setup(None);
    let (status, meta) = call(&server, "GET", "/api/meta", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(meta["version"].is_string());
    assert_eq!(meta["capabilities"]["azure_blob"]["presignedUpload"], false);
    assert_eq!(meta["capabilities"]["aws_s3"]["presignedUpload"], true);
    assert_eq!(meta["limits"]["jobConcurrency"], 1);
    assert_eq!(meta["engine"]["present"], false);
}

#[tokio::test]
async fn test_job_crud_over_http() {
    let server = setup(None);
    let id = create_profile(&server, "s3_compatible").await;
    server.provider.insert("data/x.txt", "x");

    let (status, body) = call(
        &server,
        "POST",
        "/api/jobs",
        Some(json!({
            "profileId": id,
            "type": "transfer_delete_prefix",
            "payload": {"bucket": "b", "prefix": "data"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "unsafe prefix must be rejected");
    assert_eq!(body["error"]["code"], "invalid_argument");

    let (status, job) = call(
        &server,
        "POST",
        "/api/jobs",
        Some(json!({
            "profileId": id,
            "type": "transfer_delete_prefix",
            "payload": {"bucket": "b", "prefix": "data/"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let done = wait_job(&server.store, job["id"].as_str().unwrap()).await;
    assert_eq!(done.status, objectdeck_common::JobStatus::Succeeded);
    assert!(server.provider.is_empty());

    let (status, page) = call(&server, "GET", "/api/jobs?status=succeeded", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["jobs"].as_array().unwrap().len(), 1);
}
