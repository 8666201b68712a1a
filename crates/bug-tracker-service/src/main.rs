use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use bug_tracker_core::ops::{self, ListParams};
use bug_tracker_core::{is_truthy, Bug, BugError, Pagination};
use bug_tracker_store_sqlite::SqliteBugStore;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    store: Arc<Mutex<SqliteBugStore>>,
    operation_timeout: Duration,
    telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiSuccess<T>
where
    T: Serialize,
{
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
struct ApiFailure {
    status: StatusCode,
    code: &'static str,
    error: String,
    errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreAccess {
    Read,
    Write,
}

enum StoreOutcome<T> {
    Done(Result<T, BugError>),
    Expired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    invalid_json_total: AtomicU64,
    validation_error_total: AtomicU64,
    invalid_id_total: AtomicU64,
    not_found_total: AtomicU64,
    internal_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    requests_success_total: u64,
    requests_failure_total: u64,
    timeout_total: u64,
    invalid_json_total: u64,
    validation_error_total: u64,
    invalid_id_total: u64,
    not_found_total: u64,
    internal_error_total: u64,
}

#[derive(Debug, Parser)]
#[command(name = "bug-tracker-service")]
#[command(about = "HTTP service for the bug tracker")]
struct Args {
    #[arg(long, env = "BUG_TRACKER_DB", default_value = "./bug_tracker.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "BUG_TRACKER_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,
    #[arg(long, default_value_t = 2500)]
    operation_timeout_ms: u64,
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

impl<T> ApiSuccess<T>
where
    T: Serialize,
{
    fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            pagination: None,
            message: None,
        }
    }

    fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl ApiFailure {
    fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            code,
            error: error.into(),
            errors: None,
        }
    }

    fn from_bug_error(err: BugError) -> Self {
        match err {
            BugError::Validation(errors) => Self {
                errors: Some(errors),
                ..Self::new(StatusCode::BAD_REQUEST, "validation_error", "Validation failed")
            },
            BugError::Constraint(message) => Self {
                errors: Some(vec![message]),
                ..Self::new(StatusCode::BAD_REQUEST, "validation_error", "Validation failed")
            },
            BugError::Format(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_id", "Invalid bug ID format")
            }
            BugError::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", "Bug not found"),
            BugError::Storage(message) => {
                tracing::error!(target: "bug_tracker::service", %message, "storage failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let payload = ApiErrorBody {
            success: false,
            error: self.error,
            errors: self.errors,
        };
        (self.status, Json(payload)).into_response()
    }
}

impl ServiceState {
    fn new(store: SqliteBugStore, operation_timeout: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            operation_timeout,
            telemetry: Arc::new(ServiceTelemetry::default()),
        }
    }

    fn reject(&self, failure: ApiFailure) -> ApiFailure {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record_failure(failure.code, false);
        failure
    }

    fn invalid_json(&self, rejection: &JsonRejection) -> ApiFailure {
        self.reject(ApiFailure::new(
            rejection.status(),
            "invalid_json",
            rejection.body_text(),
        ))
    }

    fn invalid_query(&self, rejection: &QueryRejection) -> ApiFailure {
        self.reject(ApiFailure::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
        ))
    }

    /// Runs `op` on the blocking pool while holding the store lock.
    ///
    /// The deadline is checked once the lock is held, so an operation that
    /// waited past it never starts. Reads are additionally abandoned when they
    /// overrun; writes that started in time are awaited to completion so a
    /// 503 always means nothing was written.
    async fn run_blocking<T, F>(
        &self,
        operation_label: &'static str,
        access: StoreAccess,
        op: F,
    ) -> Result<T, ApiFailure>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteBugStore) -> Result<T, BugError> + Send + 'static,
    {
        self.telemetry.requests_total.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let deadline = Instant::now() + self.operation_timeout;
        let handle = tokio::task::spawn_blocking(move || {
            let mut guard = match store.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    return StoreOutcome::Done(Err(BugError::Storage(
                        "store lock poisoned".to_string(),
                    )))
                }
            };
            if Instant::now() >= deadline {
                return StoreOutcome::Expired;
            }
            StoreOutcome::Done(op(&mut guard))
        });

        let join_result = match access {
            StoreAccess::Read => tokio::time::timeout(self.operation_timeout, handle)
                .await
                .map_err(|_| self.timeout_failure(operation_label))?,
            StoreAccess::Write => handle.await,
        };

        let outcome = join_result.map_err(|err| {
            self.telemetry.record_failure("internal_error", false);
            tracing::error!(
                target: "bug_tracker::service",
                operation = operation_label,
                error = %err,
                "blocking task failed"
            );
            ApiFailure::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            )
        })?;

        match outcome {
            StoreOutcome::Expired => Err(self.timeout_failure(operation_label)),
            StoreOutcome::Done(Ok(value)) => {
                self.telemetry.requests_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            StoreOutcome::Done(Err(err)) => {
                let failure = ApiFailure::from_bug_error(err);
                self.telemetry.record_failure(failure.code, false);
                Err(failure)
            }
        }
    }

    fn timeout_failure(&self, operation_label: &'static str) -> ApiFailure {
        self.telemetry.record_failure("timeout", true);
        tracing::warn!(
            target: "bug_tracker::service",
            operation = operation_label,
            timeout_ms = self.timeout_ms(),
            "operation timed out"
        );
        ApiFailure::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "timeout",
            format!("{operation_label} timed out after {} ms", self.timeout_ms()),
        )
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl ServiceTelemetry {
    fn record_failure(&self, code: &str, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match code {
            "invalid_json" => &self.invalid_json_total,
            "validation_error" => &self.validation_error_total,
            "invalid_id" => &self.invalid_id_total,
            "not_found" => &self.not_found_total,
            "internal_error" => &self.internal_error_total,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            invalid_json_total: self.invalid_json_total.load(Ordering::Relaxed),
            validation_error_total: self.validation_error_total.load(Ordering::Relaxed),
            invalid_id_total: self.invalid_id_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
        }
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/openapi", get(openapi))
        .route("/api/bugs", get(list_bugs).post(create_bug))
        .route("/api/bugs/:id", get(get_bug).put(update_bug).delete(delete_bug))
        .route("/api/bugs/:id/status", patch(update_bug_status))
        .fallback(route_not_found)
        .with_state(state)
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "bug_tracker::service", error = %err, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let store = SqliteBugStore::open(&args.db)?;
    store.migrate()?;
    let state = ServiceState::new(store, Duration::from_millis(args.operation_timeout_ms));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(
        target: "bug_tracker::service",
        bind = %args.bind,
        db = %args.db.display(),
        timeout_ms = args.operation_timeout_ms,
        "bug tracker service listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!(target: "bug_tracker::service", "bug tracker service stopped");
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timeout_ms: state.timeout_ms(),
        telemetry: state.telemetry.snapshot(),
    })
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn route_not_found() -> ApiFailure {
    ApiFailure::new(StatusCode::NOT_FOUND, "not_found", "Route not found")
}

async fn list_bugs(
    State(state): State<ServiceState>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ApiSuccess<Vec<Bug>>>, ApiFailure> {
    let Query(params) = query.map_err(|rejection| state.invalid_query(&rejection))?;
    let list = state
        .run_blocking("list_bugs", StoreAccess::Read, move |store| {
            ops::list_bugs(&*store, &params)
        })
        .await?;
    Ok(Json(ApiSuccess {
        pagination: Some(list.pagination),
        ..ApiSuccess::new(list.bugs)
    }))
}

async fn get_bug(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<ApiSuccess<Bug>>, ApiFailure> {
    let bug = state
        .run_blocking("get_bug", StoreAccess::Read, move |store| {
            ops::get_bug(&*store, &id)
        })
        .await?;
    Ok(Json(ApiSuccess::new(bug)))
}

async fn create_bug(
    State(state): State<ServiceState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiSuccess<Bug>>), ApiFailure> {
    let Json(body) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    let bug = state
        .run_blocking("create_bug", StoreAccess::Write, move |store| {
            ops::create_bug(store, &body)
        })
        .await?;
    tracing::info!(target: "bug_tracker::service", id = %bug.id, "bug created");
    Ok((
        StatusCode::CREATED,
        Json(ApiSuccess::new(bug).with_message("Bug created successfully")),
    ))
}

async fn update_bug(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ApiSuccess<Bug>>, ApiFailure> {
    let Json(body) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    let bug = state
        .run_blocking("update_bug", StoreAccess::Write, move |store| {
            ops::update_bug(store, &id, &body)
        })
        .await?;
    Ok(Json(ApiSuccess::new(bug).with_message("Bug updated successfully")))
}

async fn update_bug_status(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ApiSuccess<Bug>>, ApiFailure> {
    let Json(body) = payload.map_err(|rejection| state.invalid_json(&rejection))?;
    if !is_truthy(body.get("status")) {
        return Err(state.reject(ApiFailure::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "Status is required",
        )));
    }
    let bug = state
        .run_blocking("update_bug_status", StoreAccess::Write, move |store| {
            ops::set_bug_status(store, &id, &body)
        })
        .await?;
    Ok(Json(ApiSuccess::new(bug).with_message("Bug status updated successfully")))
}

async fn delete_bug(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<ApiSuccess<Bug>>, ApiFailure> {
    let bug = state
        .run_blocking("delete_bug", StoreAccess::Write, move |store| {
            ops::delete_bug(store, &id)
        })
        .await?;
    tracing::info!(target: "bug_tracker::service", id = %bug.id, "bug deleted");
    Ok(Json(ApiSuccess::new(bug).with_message("Bug deleted successfully")))
}
