//! Local control surface: serves the embedded control page and the JSON
//! API, and is the UserToggle origin adapter for the coordinator.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::state::{SharedUi, UiPanel};
use crate::valve::{ChangeOrigin, ValveCoordinator};

const INDEX_HTML: &str = include_str!("ui/index.html");

#[derive(Clone)]
pub struct AppState {
    pub ui: SharedUi,
    pub coordinator: Arc<ValveCoordinator<UiPanel>>,
}

#[derive(Deserialize)]
pub struct ValveRequest {
    pub on: bool,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/valve", post(api_valve))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        INDEX_HTML,
    )
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let valve = app.coordinator.state();
    let status = app.ui.read().to_status(valve);
    Json(status)
}

async fn api_valve(
    State(app): State<AppState>,
    Json(req): Json<ValveRequest>,
) -> impl IntoResponse {
    // The toggle reflects its own input before the coordinator runs, the
    // same way a physical toggle has already flipped when its event fires.
    app.ui.write().apply_toggle(req.on);
    if req.on {
        app.coordinator.request_open(ChangeOrigin::UserToggle);
    } else {
        app.coordinator.request_close(ChangeOrigin::UserToggle);
    }
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind web port");

    info!("control page listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .expect("web server error");
}

// ===========================================================================
// Tests
// ===========================================================================
