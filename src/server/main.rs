//! Resource server.
//!
//! HTTP API over the resolution pipeline: viewport queries, cache
//! invalidation and on-demand expiry sweeps.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use refuge::service::{CacheStats, InvalidateOutcome, SweepReport};
use refuge::{Config, ResolveError, ResolveRequest, ResolveResponse, ResourceService};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Assistance resource server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache database directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Error body returned by every endpoint
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(StatusCode, String);

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        let status = match err {
            ResolveError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
            ResolveError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ResolveError::Cache(_) => {
                tracing::error!("Request failed on cache storage: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Refuge Resource Server");

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(data_dir) = args.data_dir {
        config.cache.data_dir = data_dir;
    }

    info!("Opening cache at {}", config.cache.data_dir.display());
    let service = Arc::new(ResourceService::from_config(&config)?);

    let stats = service.stats();
    info!(
        "Cache holds {} resources and {} viewport queries",
        stats.resources, stats.queries
    );

    let sweeper = service.clone().spawn_sweeper(config.cache.sweep_interval());

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/resources", post(resources_handler))
        .route("/v1/cache", delete(invalidate_handler))
        .route("/v1/cache/sweep", post(sweep_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service.clone());

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    service.flush()?;
    info!("Cache flushed, shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    cache: CacheStats,
}

async fn health_handler(State(service): State<Arc<ResourceService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cache: service.stats(),
    })
}

/// Resolve resources around a viewport
async fn resources_handler(
    State(service): State<Arc<ResourceService>>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.body_text()))?;

    let response = service.resolve_resources(&request).await?;
    Ok(Json(response))
}

async fn invalidate_handler(
    State(service): State<Arc<ResourceService>>,
    Query(request): Query<ResolveRequest>,
) -> Result<Json<InvalidateOutcome>, ApiError> {
    Ok(Json(service.invalidate(&request)?))
}

async fn sweep_handler(
    State(service): State<Arc<ResourceService>>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = service.sweep_expired().map_err(|e| {
        tracing::error!("Sweep failed: {}", e);
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(report))
}
