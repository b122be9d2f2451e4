use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use foreman_common::ids::WorkerId;
use foreman_common::types::{IssueGraph, WorkOrder, WorkResult};

use foreman_controller::config;
use foreman_controller::controller::{Controller, WorkerAdapter};
use foreman_controller::metrics_collector::ExportFormat;

/// Placeholder executor: acknowledges every order as successful.
///
/// Real deployments supply their own adapter (build runner, code generator,
/// external API client); the controller core never executes work itself.
struct NoopAdapter;

#[async_trait]
impl WorkerAdapter for NoopAdapter {
    async fn execute(&self, worker_id: &WorkerId, order: &WorkOrder) -> WorkResult {
        tracing::info!(
            worker_id = %worker_id,
            order_id = %order.order_id,
            issue_id = %order.issue_id,
            "No-op adapter acknowledging work order"
        );
        WorkResult::success(order.order_id.clone())
    }
}

/// Shared application state accessible from axum handlers.
struct AppState {
    controller: Arc<Controller>,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Foreman controller starting");

    // Load configuration — fail loudly on misconfiguration.
    let config_dir = std::env::var("FOREMAN_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let controller_config = match config::load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // Install the Prometheus recorder for operational facade metrics.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let project_id = std::env::var("FOREMAN_PROJECT").unwrap_or_else(|_| "default".into());

    let controller = Controller::new(controller_config, project_id, Arc::new(NoopAdapter));

    match controller.init().await {
        Ok(true) => tracing::info!("Recovered controller state from previous run"),
        Ok(false) => tracing::info!("No previous controller state found"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize storage");
            std::process::exit(1);
        }
    }

    if let Err(e) = controller.start_monitors() {
        tracing::error!(error = %e, "Failed to start monitors");
        std::process::exit(1);
    }

    let state = Arc::new(AppState {
        controller,
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/graph", post(graph_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    let port: u16 = std::env::var("FOREMAN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "Foreman controller listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.controller.pool().status();
    let body = serde_json::json!({
        "status": "healthy",
        "workers": {
            "total": pool.total_workers,
            "idle": pool.idle_workers,
            "working": pool.working_workers,
            "error": pool.error_workers,
        }
    });
    (StatusCode::OK, Json(body))
}

/// Prometheus metrics endpoint: operational facade metrics followed by the
/// domain collector's exposition.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    let mut body = state.metrics_handle.render();
    match state.controller.collector().export(ExportFormat::Prometheus) {
        Ok(domain) => body.push_str(&domain),
        Err(e) => tracing::error!(error = %e, "Metrics export failed"),
    }
    body
}

/// POST /graph — analyze a dependency graph and run it to completion.
async fn graph_handler(
    State(state): State<Arc<AppState>>,
    Json(graph): Json<IssueGraph>,
) -> impl IntoResponse {
    // Surface analysis failures synchronously; execution runs in background.
    if let Err(e) = state.controller.analyze(&graph) {
        let body = serde_json::json!({ "error": e.to_string() });
        return (StatusCode::BAD_REQUEST, Json(body));
    }

    let node_count = graph.nodes.len();
    let controller = Arc::clone(&state.controller);
    tokio::spawn(async move {
        match controller.run(graph).await {
            Ok(summary) => tracing::info!(
                completed = summary.completed.len(),
                failed = summary.failed.len(),
                blocked = summary.blocked.len(),
                "Graph run finished"
            ),
            Err(e) => tracing::error!(error = %e, "Graph run failed"),
        }
    });

    let body = serde_json::json!({
        "status": "accepted",
        "nodes": node_count,
    });
    (StatusCode::ACCEPTED, Json(body))
}

/// GET /status — current progress snapshot.
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = state.controller.progress().metrics();
    let pool = state.controller.pool().status();
    let queue = state.controller.pool().queue().status();

    let body = serde_json::json!({
        "progress": metrics,
        "pool": pool,
        "queue": queue,
        "bottlenecks": state.controller.progress().active_bottlenecks(),
    });
    (StatusCode::OK, Json(body))
}
