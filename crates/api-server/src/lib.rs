//! HTTP surface of the portfolio performance site: a health probe and an
//! authenticated ad-hoc equity curve endpoint.

pub mod auth;
pub mod config;
pub mod equity_routes;


use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use perf_core::PriceSource;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use auth::{CachedVerifier, IdentityToolkitVerifier, TokenVerifier};
use config::{PriceBackend, ServerConfig};

#[derive(Clone)]
pub struct AppState {
    pub price_source: Arc<dyn PriceSource>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Arc<ServerConfig>,
}

/// Handler error rendered as `{ "success": false, "error": ... }`.
#[derive(Debug)]
pub struct AppError {
    pub(crate) status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{}: {:#}", self.status, self.error);
        }
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "Backend OK",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub fn build_router(state: AppState) -> Router {
    let protected = equity_routes::equity_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::auth_middleware,
    ));

    Router::new()
        .route("/", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}

fn price_source(backend: &PriceBackend) -> Arc<dyn PriceSource> {
    match backend {
        PriceBackend::Polygon { api_key } => {
            Arc::new(market_data::PolygonClient::new(api_key.clone()))
        }
        PriceBackend::Csv { path } => Arc::new(csv_store::CsvPriceSource::new(path)),
    }
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_server=info,market_data=warn,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let source = price_source(&config.price_backend);
    let verifier = CachedVerifier::new(
        IdentityToolkitVerifier::new(config.identity_api_key.clone()),
        config.token_cache_ttl,
    );
    tracing::info!(
        "Prices from {}, {} CORS origin(s), token cache TTL {:?}",
        source.name(),
        config.allowed_origins.len(),
        config.token_cache_ttl
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState {
        price_source: source,
        verifier: Arc::new(verifier),
        config: Arc::new(config),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
