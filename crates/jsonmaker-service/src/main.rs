use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use jsonmaker_api::{
    ApiError, ApiResult, CreateBackupResponse, GraphResponse, JsonMakerApi, SaveGraphResponse,
    SaveTopicsResponse, StorageLayout, API_CONTRACT_VERSION,
};
use jsonmaker_core::{BackupLedger, SaveGraphRequest, SaveTopicsRequest, TopicSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: JsonMakerApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service_contract_version: &'static str,
    api_contract_version: &'static str,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "jsonmaker-service")]
#[command(about = "HTTP persistence and backup service for JsonMaker datasets")]
struct Args {
    #[arg(long, env = "JSONMAKER_DATA_DIR", default_value = "./json_data")]
    data_dir: PathBuf,
    #[arg(long, env = "JSONMAKER_BACKUPS_DIR", default_value = "./backups")]
    backups_dir: PathBuf,
    #[arg(long, env = "JSONMAKER_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
    /// Comma-separated list of origins, or `*` for any.
    #[arg(long, env = "JSONMAKER_ALLOWED_ORIGINS", default_value = "*", value_delimiter = ',')]
    allowed_origins: Vec<String>,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        let status = match &err {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after_seconds = match &err {
            ApiError::RateLimited { remaining_seconds } => Some(*remaining_seconds),
            _ => None,
        };
        Self { status, error: err.code(), detail: err.to_string(), retry_after_seconds }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(&self)).into_response();
        if let Some(seconds) = self.retry_after_seconds {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/sync", post(sync_topics))
        .route("/restore", get(restore_topics))
        .route("/sync_graph", post(sync_graph))
        .route("/restore_graph", get(restore_graph))
        .route("/backup", post(create_backup))
        .route("/backups", get(list_backups))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if allowed_origins.iter().any(|origin| origin.trim() == "*") {
        return cors.allow_origin(Any);
    }

    let mut origins = Vec::new();
    for origin in allowed_origins {
        match HeaderValue::from_str(origin.trim()) {
            Ok(value) => origins.push(value),
            Err(_) => tracing::error!(origin = %origin, "ignoring invalid CORS origin"),
        }
    }
    cors.allow_origin(AllowOrigin::list(origins))
}

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    let initialised = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };
    initialised.map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format)?;

    let layout = StorageLayout::new(args.data_dir, args.backups_dir);
    tracing::info!(
        data_dir = %layout.data_dir.display(),
        backups_dir = %layout.backups_dir.display(),
        bind = %args.bind,
        "starting jsonmaker service"
    );
    let state = ServiceState { api: JsonMakerApi::new(&layout) };
    let router = app(state).layer(cors_layer(&args.allowed_origins));

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Storage calls block on the filesystem, so they run off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(err) => Err(ApiError::Internal(format!("storage task failed: {err}")).into()),
    }
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, ServiceError> {
    serde_json::from_value(body)
        .map_err(|err| ApiError::InvalidInput(format!("malformed request body: {err}")).into())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
    })
}

async fn sync_topics(
    State(state): State<ServiceState>,
    Json(body): Json<Value>,
) -> Result<Json<SaveTopicsResponse>, ServiceError> {
    let request: SaveTopicsRequest = parse_body(body)?;
    run_blocking(move || state.api.save_topics(&request)).await.map(Json)
}

async fn restore_topics(
    State(state): State<ServiceState>,
) -> Result<Json<TopicSnapshot>, ServiceError> {
    run_blocking(move || state.api.restore_topics()).await.map(Json)
}

async fn sync_graph(
    State(state): State<ServiceState>,
    Json(body): Json<Value>,
) -> Result<Json<SaveGraphResponse>, ServiceError> {
    let request: SaveGraphRequest = parse_body(body)?;
    run_blocking(move || state.api.save_graph(request)).await.map(Json)
}

async fn restore_graph(
    State(state): State<ServiceState>,
) -> Result<Json<GraphResponse>, ServiceError> {
    run_blocking(move || state.api.restore_graph()).await.map(Json)
}

async fn create_backup(
    State(state): State<ServiceState>,
) -> Result<Json<CreateBackupResponse>, ServiceError> {
    run_blocking(move || state.api.create_backup()).await.map(Json)
}

async fn list_backups(
    State(state): State<ServiceState>,
) -> Result<Json<BackupLedger>, ServiceError> {
    run_blocking(move || Ok(state.api.list_backups())).await.map(Json)
}
