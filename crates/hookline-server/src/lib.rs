//! HTTP control surface for Hookline.
//!
//! Exposes run control, branch management, artifact reads and edits, and a
//! Server-Sent Events stream of [`hookline_engine::RunEvent`]s. All state
//! lives in the engine and store; the server is a thin, stateless mapping
//! from HTTP to coordinator calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};

use hookline_engine::SharedCoordinator;
use hookline_types::HooklineError;

pub mod routes;
pub mod stream;

/// Shared application state accessible from Axum routes.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: SharedCoordinator,
}

/// Build the API router over a coordinator.
pub fn router(coordinator: SharedCoordinator) -> Router {
    let state = AppState { coordinator };
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/events", get(stream::events))
        .route(
            "/api/branches",
            get(routes::list_branches).post(routes::create_branch),
        )
        .route(
            "/api/branches/:id",
            get(routes::get_branch).delete(routes::delete_branch),
        )
        .route("/api/branches/:id/state", get(routes::branch_state))
        .route("/api/branches/:id/switch", post(routes::switch_branch))
        .route("/api/branches/:id/run", post(routes::start_run))
        .route("/api/branches/:id/continue", post(routes::continue_gate))
        .route("/api/branches/:id/abort", post(routes::abort))
        .route("/api/branches/:id/rerun", post(routes::rerun_unit))
        .route("/api/branches/:id/selection", post(routes::record_selection))
        .route("/api/branches/:id/edit", post(routes::edit_artifact))
        .route(
            "/api/branches/:id/artifacts/:stage",
            get(routes::list_artifacts),
        )
        .route("/api/foundation", put(routes::put_foundation))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    addr: std::net::SocketAddr,
    coordinator: SharedCoordinator,
) -> std::io::Result<()> {
    let app = router(coordinator);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Hookline server listening");
    axum::serve(listener, app).await
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// JSON error responses carrying the engine's HTTP status mapping.
pub struct ApiError(pub HooklineError);

impl From<HooklineError> for ApiError {
    fn from(error: HooklineError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
