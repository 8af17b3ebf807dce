mod codehost;
mod config;
mod discovery;
mod docs;
mod error;
mod executor;
mod investigation;
mod metrics;
mod notify;
mod platform;
mod policy;
mod scheduler;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::config::{CortexConfig, LogFormat};
use crate::error::{CortexError, CortexResult};
use crate::scheduler::{spawn_initial_discovery, HealthMonitor, RediscoveryLoop};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let _basic_tracing = init_tracing_basic();

    info!("Starting Cortex diagnostics daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = CortexConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", config.bind_address);

    let state = Arc::new(AppState::new(config.clone()).context("Failed to initialize application state")?);

    spawn_initial_discovery(state.clone());

    let monitor = HealthMonitor::new(state.clone(), config.monitor_interval_secs, state.shutdown_tx.subscribe());
    tokio::spawn(monitor.run());

    let rediscovery = RediscoveryLoop::new(state.clone(), config.discovery_interval_secs, state.shutdown_tx.subscribe());
    tokio::spawn(rediscovery.run());

    info!(
        "✓ Background tasks started (monitor every {}s, rediscovery every {}s)",
        config.monitor_interval_secs, config.discovery_interval_secs
    );

    let app = build_router(state.clone());

    let addr: SocketAddr = config.bind_address.parse().context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr).await.context("Failed to bind to address")?;

    info!("✓ Cortex is ready! Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.shutdown();
    info!("Server shut down gracefully");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new();
    let request_timeout = Duration::from_secs(30);

    let authenticated = Router::new()
        .route("/status", get(status_handler))
        .route("/services", get(list_services_handler))
        .route("/services/{name}", get(service_deep_context_handler))
        .route("/services/{name}/diagnose", get(diagnose_handler))
        .route("/incidents", get(list_incidents_handler))
        .route("/incidents/{id}", get(get_incident_handler))
        .route("/docs", get(list_docs_handler))
        .route("/discover", post(discover_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token));

    // /health and /webhooks/railway are mounted outside the auth layer: the
    // platform triggering the webhook cannot be made to carry an operator's
    // bearer token (§6).
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/railway", post(railway_webhook_handler))
        .merge(authenticated)
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
                .layer(cors),
        )
        .with_state(state)
}

/// Bearer-token auth via a single fixed header token (§6). `/health` is
/// mounted outside this layer and never reaches it. An unconfigured token
/// is treated as dev mode and left open, matching the original daemon's
/// `verify_token`.
async fn require_bearer_token(State(state): State<Arc<AppState>>, req: Request, next: Next) -> impl IntoResponse {
    if state.config.api_token.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided != Some(state.config.api_token.as_str()) {
        return CortexError::Unauthorized.into_response();
    }

    next.run(req).await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = state.store.list_services();
    let flags = state.store.list_flags(None);

    let services_summary: Vec<_> = services
        .iter()
        .map(|s| json!({ "name": s.name, "type": s.service_type.as_str(), "stack": s.stack }))
        .collect();
    let flags_summary: Vec<_> = flags
        .iter()
        .take(10)
        .map(|f| json!({ "service": f.service, "flag_type": f.flag_type, "message": f.message }))
        .collect();

    Json(json!({
        "service_count": services.len(),
        "open_flag_count": flags.len(),
        "services": services_summary,
        "flags": flags_summary,
        "discovery_runs": state.metrics.discovery_runs(),
        "investigations_started": state.metrics.investigations_started(),
        "diagnoses_reached": state.metrics.diagnoses_reached(),
        "llm_transport_errors": state.metrics.llm_transport_errors(),
    }))
}

async fn list_services_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.list_services())
}

async fn service_deep_context_handler(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> CortexResult<impl IntoResponse> {
    let context = state
        .store
        .get_deep_context(&name)
        .ok_or_else(|| CortexError::NotFound(format!("service '{name}' not found")))?;
    Ok(Json(context))
}

async fn diagnose_handler(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> CortexResult<impl IntoResponse> {
    if state.store.get_service(&name).is_none() {
        return Err(CortexError::NotFound(format!("service '{name}' not found")));
    }

    let incident = state
        .investigate_and_act(&name, &format!("Manual diagnosis requested for {name}"))
        .await;

    Ok(Json(json!({
        "id": incident.incident_id,
        "diagnosis": incident.diagnosis,
        "severity": incident.severity,
        "actions": incident.actions,
        "turns": incident.turns,
    })))
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    service: Option<String>,
    limit: Option<usize>,
}

async fn list_incidents_handler(State(state): State<Arc<AppState>>, Query(q): Query<IncidentsQuery>) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(20);
    let incidents = state.store.list_recent_incidents(q.service.as_deref(), limit);
    Json(incidents)
}

async fn get_incident_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> CortexResult<impl IntoResponse> {
    let incident = state
        .store
        .get_incident(&id)
        .ok_or_else(|| CortexError::NotFound(format!("incident '{id}' not found")))?;
    Ok(Json(incident))
}

async fn list_docs_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.docs.list_available_docs())
}

async fn discover_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.discovery.run().await;
    state.metrics.discovery_run_completed();
    let services = state.store.list_services();
    let flags = state.store.list_flags(None);
    Json(json!({ "status": "ok", "services": services.len(), "flags": flags.len() }))
}

#[derive(Debug, Deserialize)]
struct RailwayWebhookService {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RailwayWebhook {
    #[serde(rename = "type")]
    event_type: String,
    status: String,
    service: RailwayWebhookService,
}

const FAILURE_STATUSES: &[&str] = &["FAILED", "CRASHED", "ERROR"];

/// Deploy webhook ingestion: on a failure-class status for a known service,
/// run an investigation. Any other status (or an unknown service) is
/// acknowledged without triggering one.
async fn railway_webhook_handler(State(state): State<Arc<AppState>>, Json(body): Json<RailwayWebhook>) -> impl IntoResponse {
    if !FAILURE_STATUSES.contains(&body.status.as_str()) {
        return Json(json!({ "status": "ignored", "reason": "not a failure status" }));
    }

    if state.store.get_service(&body.service.name).is_none() {
        warn!(service = %body.service.name, "webhook for unknown service");
        return Json(json!({ "status": "ignored", "reason": "unknown service" }));
    }

    let trigger = format!("Deploy {} status {} for {}", body.event_type, body.status, body.service.name);
    let incident = state.investigate_and_act(&body.service.name, &trigger).await;

    Json(json!({
        "status": "investigated",
        "incident_id": incident.incident_id,
        "diagnosis": incident.diagnosis,
        "turns": incident.turns,
    }))
}

fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cortex=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

fn init_tracing_from_config(config: &CortexConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

