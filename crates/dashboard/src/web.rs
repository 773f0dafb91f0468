use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::actions::{self, ActionError, UserAction};
use crate::client::DeviceClient;
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub client: Arc<dyn DeviceClient>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/view", get(api_view))
        .route("/api/events", get(api_events))
        .route("/api/action", post(api_action))
        .with_state(state)
}

async fn api_view(State(state): State<AppState>) -> impl IntoResponse {
    // Write lock: building the view also expires timed-out intents.
    let mut st = state.shared.write().await;
    Json(st.to_view())
}

async fn api_events(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.recent_events())
}

async fn api_action(
    State(state): State<AppState>,
    Json(action): Json<UserAction>,
) -> Result<impl IntoResponse, ActionError> {
    let name = action.name();
    actions::submit(&state.shared, state.client.as_ref(), action).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "action": name, "status": "submitted" })),
    ))
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = if self.is_refusal() {
            StatusCode::CONFLICT
        } else {
            StatusCode::BAD_GATEWAY
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Serve the API until `cancel` fires.
pub async fn serve(state: AppState, port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "dashboard api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
