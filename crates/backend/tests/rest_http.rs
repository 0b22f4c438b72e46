use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use casework_backend::rest::{RestBackend, RestConfig};
use casework_backend::{BackendError, Filter, Persistence, Row, Select};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    path: String,
    query: Option<String>,
    apikey: Option<String>,
    authorization: Option<String>,
    prefer: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

type Log = Arc<Mutex<Vec<Captured>>>;

fn capture(log: &Log, method: Method, path: String, query: Option<String>, headers: &HeaderMap, body: Vec<u8>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    log.lock().expect("log lock").push(Captured {
        method,
        path,
        query,
        apikey: header("apikey"),
        authorization: header("authorization"),
        prefer: header("prefer"),
        content_type: header("content-type"),
        body,
    });
}

async fn table_handler(
    State(log): State<Log>,
    Path(table): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    capture(&log, method.clone(), format!("/rest/v1/{}", table), query, &headers, body.to_vec());

    if table == "broken" {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"code": "PGRST100", "message": "failed to parse filter"})),
        );
    }

    match method {
        Method::POST => {
            let mut row: serde_json::Value =
                serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
            row["id"] = json!("generated-1");
            (StatusCode::CREATED, axum::Json(json!([row])))
        }
        Method::DELETE => (
            StatusCode::OK,
            axum::Json(json!([{"id": "a"}, {"id": "b"}])),
        ),
        _ => (
            StatusCode::OK,
            axum::Json(json!([{"id": "a", "status": "pending"}])),
        ),
    }
}

async fn storage_handler(
    State(log): State<Log>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    capture(
        &log,
        Method::POST,
        format!("/storage/v1/object/{}/{}", bucket, path),
        None,
        &headers,
        body.to_vec(),
    );
    if path.starts_with("exists/") {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"statusCode": "409", "error": "Duplicate", "message": "The resource already exists"})),
        );
    }
    (StatusCode::OK, axum::Json(json!({"Key": format!("{}/{}", bucket, path)})))
}

async fn root_handler() -> &'static str {
    "{}"
}

async fn spawn_mock_backend(
    log: Log,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/rest/v1/", get(root_handler))
        .route("/rest/v1/{table}", any(table_handler))
        .route("/storage/v1/object/{bucket}/{*path}", post(storage_handler))
        .with_state(log);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    (addr, shutdown_tx, handle)
}

fn client(addr: SocketAddr) -> RestBackend {
    RestBackend::new(RestConfig {
        base_url: format!("http://{}/", addr),
        api_key: "service-key".to_string(),
        timeout: Duration::from_secs(5),
    })
    .expect("client should build")
}

#[tokio::test]
async fn select_sends_filters_order_limit_and_auth_headers() {
    let log = Log::default();
    let (addr, shutdown, task) = spawn_mock_backend(log.clone()).await;
    let backend = client(addr);

    let rows = backend
        .select(
            &Select::from("applications")
                .eq("status", "pending")
                .order_desc("created_at")
                .limit(20),
        )
        .await
        .expect("select should succeed");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some(&json!("pending")));

    let captured = log.lock().expect("log lock")[0].clone();
    assert_eq!(captured.method, Method::GET);
    assert_eq!(captured.path, "/rest/v1/applications");
    assert_eq!(
        captured.query.as_deref(),
        Some("select=*&status=eq.pending&order=created_at.desc&limit=20")
    );
    assert_eq!(captured.apikey.as_deref(), Some("service-key"));
    assert_eq!(captured.authorization.as_deref(), Some("Bearer service-key"));

    let _ = shutdown.send(());
    let _ = task.await;
}

#[tokio::test]
async fn insert_asks_for_representation_and_returns_stored_row() {
    let log = Log::default();
    let (addr, shutdown, task) = spawn_mock_backend(log.clone()).await;
    let backend = client(addr);

    let mut row = Row::new();
    row.insert("full_name".to_string(), json!("Ann"));
    let stored = backend
        .insert("applications", row)
        .await
        .expect("insert should succeed");
    assert_eq!(stored.get("id"), Some(&json!("generated-1")));
    assert_eq!(stored.get("full_name"), Some(&json!("Ann")));

    let captured = log.lock().expect("log lock")[0].clone();
    assert_eq!(captured.method, Method::POST);
    assert_eq!(captured.prefer.as_deref(), Some("return=representation"));
    let body: serde_json::Value = serde_json::from_slice(&captured.body).expect("json body");
    assert_eq!(body, json!({"full_name": "Ann"}));

    let _ = shutdown.send(());
    let _ = task.await;
}

#[tokio::test]
async fn delete_counts_returned_rows_and_refuses_empty_filters() {
    let log = Log::default();
    let (addr, shutdown, task) = spawn_mock_backend(log.clone()).await;
    let backend = client(addr);

    let removed = backend
        .delete("applications", &[Filter::eq("id", "a")])
        .await
        .expect("delete should succeed");
    assert_eq!(removed, 2);

    let err = backend
        .delete("applications", &[])
        .await
        .expect_err("unfiltered delete must fail");
    assert!(matches!(err, BackendError::InvalidQuery(_)));
    assert_eq!(log.lock().expect("log lock").len(), 1);

    let _ = shutdown.send(());
    let _ = task.await;
}

#[tokio::test]
async fn rejected_requests_carry_backend_message() {
    let log = Log::default();
    let (addr, shutdown, task) = spawn_mock_backend(log.clone()).await;
    let backend = client(addr);

    let err = backend
        .select(&Select::from("broken"))
        .await
        .expect_err("select should fail");
    match err {
        BackendError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "failed to parse filter");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let _ = shutdown.send(());
    let _ = task.await;
}

#[tokio::test]
async fn upload_posts_bytes_with_content_type_and_reports_conflicts() {
    let log = Log::default();
    let (addr, shutdown, task) = spawn_mock_backend(log.clone()).await;
    let backend = client(addr);

    backend
        .upload("visit-photos", "v1/1700.jpg", vec![0xff, 0xd8], "image/jpeg")
        .await
        .expect("upload should succeed");

    let captured = log.lock().expect("log lock")[0].clone();
    assert_eq!(captured.path, "/storage/v1/object/visit-photos/v1/1700.jpg");
    assert_eq!(captured.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(captured.body, vec![0xff, 0xd8]);

    let err = backend
        .upload("visit-photos", "exists/1.jpg", vec![1], "image/jpeg")
        .await
        .expect_err("existing object should be rejected");
    assert!(matches!(err, BackendError::Rejected { .. }));

    assert_eq!(
        backend.public_url("visit-photos", "v1/1700.jpg"),
        format!(
            "http://{}/storage/v1/object/public/visit-photos/v1/1700.jpg",
            addr
        )
    );
    backend.ping().await.expect("ping should succeed");

    let _ = shutdown.send(());
    let _ = task.await;
}

#[tokio::test]
async fn unreachable_backend_is_an_http_error() {
    let backend = RestBackend::new(RestConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        api_key: "k".to_string(),
        timeout: Duration::from_secs(2),
    })
    .expect("client should build");

    let err = backend.ping().await.expect_err("ping should fail");
    assert!(matches!(err, BackendError::Http(_) | BackendError::Timeout));
}
