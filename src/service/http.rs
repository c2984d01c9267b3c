use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{AddRequest, ErrorBody, GraphSink, StoreSink};
use crate::config::GraphServiceConfig;
use crate::error::{GraphRefineError, Result};
use crate::graph::GraphStore;

/// HTTP front for a [`GraphStore`].
pub struct GraphServer {
    sink: StoreSink,
    port: u16,
}

impl GraphServer {
    pub fn new(store: GraphStore, config: &GraphServiceConfig) -> Self {
        Self {
            sink: StoreSink::new(store, config.database.clone()),
            port: config.port,
        }
    }

    /// Serve until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            GraphRefineError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to bind to {}: {}. Set graph_service.port in config.toml to use another port.",
                    addr, e
                ),
            ))
        })?;

        log::info!("Graph write service listening on http://{}", addr);
        log::info!("Write endpoint: http://{}/api/graph/add", addr);

        axum::serve(listener, router(self.sink.clone()))
            .await
            .map_err(|e| {
                GraphRefineError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("HTTP server error: {}", e),
                ))
            })
    }
}

#[derive(Clone)]
struct AppState {
    sink: Arc<StoreSink>,
}

/// Routes: `POST /add` (also at `/api/graph/add`), `GET /snapshots`,
/// `GET /snapshots/:name`, `GET /health`.
pub fn router(sink: StoreSink) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/add", post(handle_add))
        .route("/api/graph/add", post(handle_add))
        .route("/snapshots", get(handle_list_snapshots))
        .route("/snapshots/:name", get(handle_read_snapshot))
        .route("/health", get(handle_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(AppState { sink: Arc::new(sink) })
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn status_for(error: &GraphRefineError) -> StatusCode {
    match error {
        GraphRefineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        GraphRefineError::SnapshotNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_add(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AddRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            log::warn!("Rejected /add body: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.sink.add(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            log::error!("Graph write failed: {}", e);
            error_response(status_for(&e), e.to_string())
        }
    }
}

async fn handle_list_snapshots(State(state): State<AppState>) -> Response {
    match state.sink.store().list_snapshots().await {
        Ok(snapshots) => (StatusCode::OK, Json(snapshots)).into_response(),
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

async fn handle_read_snapshot(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.sink.store().read(&name).await {
        Ok(graph) => (StatusCode::OK, Json(graph)).into_response(),
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "graphrefine",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}
