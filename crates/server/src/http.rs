use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use casework_auth::{HttpIdentityConfig, HttpIdentityProvider, IdentityProvider};
use casework_backend::rest::{RestBackend, RestConfig};
use casework_backend::{Backend, BackendError, Row};
use casework_contracts::requests::ValidationError;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{ServerConfig, StartupError};

mod admin;
mod applicants;
mod documents;
mod field;
mod intake;
mod merge;
mod session;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    backend: Backend,
    identity: Arc<dyn IdentityProvider>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(config: ServerConfig) -> Result<Router, StartupError> {
    let rest = |api_key: &str| {
        RestBackend::new(RestConfig {
            base_url: config.backend_url.clone(),
            api_key: api_key.to_string(),
            timeout: config.backend_timeout(),
        })
        .map_err(|err| StartupError {
            code: "ERR_BACKEND_UNAVAILABLE",
            message: format!("failed to initialize backend client: {}", err),
        })
    };

    let backend = Backend::new(
        Arc::new(rest(&config.backend_anon_key)?),
        Arc::new(rest(&config.backend_service_key)?),
    );

    let identity = HttpIdentityProvider::new(HttpIdentityConfig {
        base_url: config.backend_url.clone(),
        anon_key: config.backend_anon_key.clone(),
        service_key: config.backend_service_key.clone(),
        timeout: config.backend_timeout(),
    })
    .map_err(|err| StartupError {
        code: err.code,
        message: err.message,
    })?;

    Ok(router_with(config, backend, Arc::new(identity)))
}

/// Builds the router over already-constructed backends.
pub fn router_with(
    config: ServerConfig,
    backend: Backend,
    identity: Arc<dyn IdentityProvider>,
) -> Router {
    let body_limit = config.max_upload_bytes;
    let state = AppState {
        config,
        backend,
        identity,
    };

    Router::new()
        .route(
            "/applications",
            post(intake::create_application).get(intake::list_applications),
        )
        .route(
            "/applications/documents",
            post(documents::upload_document).get(documents::list_documents),
        )
        .route(
            "/applications/{id}",
            get(intake::get_application).patch(intake::update_application),
        )
        .route("/applicants/search", get(applicants::search))
        .route("/applicants/{id}/visits", get(applicants::visit_history))
        .route("/applicants/{id}/merge", post(merge::merge_applicants))
        .route(
            "/case-events",
            post(field::create_case_event).get(field::list_case_events),
        )
        .route("/dashboard/field-visits", get(field::dashboard_visits))
        .route(
            "/worker/visits",
            get(field::list_worker_visits).post(field::create_visit),
        )
        .route(
            "/worker/visits/{id}",
            get(field::get_visit).patch(field::update_visit),
        )
        .route(
            "/worker/photos",
            post(documents::upload_photo).get(documents::list_photos),
        )
        .route("/workers", get(field::list_workers))
        .route("/auth/login", post(session::login))
        .route(
            "/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(middleware::from_fn(catch_panics))
        .layer(middleware::from_fn(request_context))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let backend_ready = match state.backend.elevated().ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "readyz.backend_unavailable");
            false
        }
    };
    checks.insert("backend", backend_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn request_context(request: Request, next: Next) -> Response {
    let request_id = extract_request_id(request.headers());
    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    span.record("status", response.status().as_u16());
    span.record("latency_ms", started.elapsed().as_millis() as u64);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Runs the rest of the stack on its own task so a panicking handler
/// becomes a generic 500 instead of a dropped connection.
async fn catch_panics(request: Request, next: Next) -> Response {
    let span = tracing::Span::current();
    match tokio::spawn(next.run(request).instrument(span)).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "http.handler_panicked");
            internal_error().into_response()
        }
    }
}

async fn track_metrics(matched: MatchedPath, request: Request, next: Next) -> Response {
    let route = matched.as_str().to_string();
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    crate::metrics::observe_http_request(
        &route,
        &method,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: Option<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            error: message.into(),
            details,
        }),
    )
}

fn invalid_request(err: ValidationError) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_REQUEST",
        err.message,
        None,
    )
}

fn invalid_json(rejection: JsonRejection) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_REQUEST",
        "invalid JSON body",
        Some(rejection.body_text()),
    )
}

fn invalid_query(rejection: QueryRejection) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_REQUEST",
        "invalid query string",
        Some(rejection.body_text()),
    )
}

fn not_found(message: &str) -> ApiError {
    json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", message, None)
}

/// Backend failures keep the backend's own message in `details`.
fn upstream_error(message: &str, err: &BackendError) -> ApiError {
    tracing::warn!(error = %err, "{}", message);
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_UPSTREAM",
        message,
        Some(err.details()),
    )
}

fn internal_error() -> ApiError {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_INTERNAL",
        "internal server error",
        None,
    )
}

fn encode_row<T: Serialize>(value: &T) -> Result<Row, ApiError> {
    casework_backend::to_row(value).map_err(|err| {
        tracing::error!(error = %err, "failed to encode row");
        internal_error()
    })
}

#[derive(Debug, Serialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct WriteResponse<T> {
    success: bool,
    data: T,
}

fn data<T: Serialize>(data: T) -> Json<DataResponse<T>> {
    Json(DataResponse { data })
}

fn written<T: Serialize>(data: T) -> Json<WriteResponse<T>> {
    Json(WriteResponse {
        success: true,
        data,
    })
}

fn created<T: Serialize>(data: T) -> (StatusCode, Json<WriteResponse<T>>) {
    (StatusCode::CREATED, written(data))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::Router;
    use casework_auth::memory::MemoryIdentityProvider;
    use casework_backend::Backend;
    use casework_backend::memory::MemoryBackend;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use crate::config::ServerConfig;

    pub(crate) struct TestApp {
        pub addr: SocketAddr,
        pub restricted: Arc<MemoryBackend>,
        pub elevated: Arc<MemoryBackend>,
        pub identity: Arc<MemoryIdentityProvider>,
        pub client: reqwest::Client,
        shutdown: Option<oneshot::Sender<()>>,
    }

    impl TestApp {
        pub fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }
    }

    impl Drop for TestApp {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
        }
    }

    pub(crate) fn test_config() -> ServerConfig {
        ServerConfig::from_kv(&HashMap::from([
            (
                "CASEWORK_BACKEND_URL".to_string(),
                "http://backend.invalid".to_string(),
            ),
            ("CASEWORK_BACKEND_ANON_KEY".to_string(), "anon".to_string()),
            (
                "CASEWORK_BACKEND_SERVICE_KEY".to_string(),
                "service".to_string(),
            ),
            ("CASEWORK_MAX_UPLOAD_BYTES".to_string(), "65536".to_string()),
        ]))
        .expect("test config should be valid")
    }

    /// Both tiers share one store unless a test asks otherwise.
    pub(crate) async fn spawn_app() -> TestApp {
        let store = Arc::new(MemoryBackend::new());
        spawn_app_with(store.clone(), store).await
    }

    pub(crate) async fn spawn_app_with(
        restricted: Arc<MemoryBackend>,
        elevated: Arc<MemoryBackend>,
    ) -> TestApp {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let app = super::router_with(
            test_config(),
            Backend::new(restricted.clone(), elevated.clone()),
            identity.clone(),
        );
        let (addr, shutdown) = spawn_server(app).await;

        TestApp {
            addr,
            restricted,
            elevated,
            identity,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown),
        }
    }

    async fn spawn_server(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("local_addr should succeed");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        (addr, shutdown_tx)
    }
}
