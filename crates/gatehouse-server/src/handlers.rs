//! HTTP handlers for Gatehouse server.
//!
//! Two WebSocket endpoints create and join rooms; everything after the
//! upgrade is handled by the connection pumps in `gatehouse-core`.

use crate::config::Config;
use crate::ids;
use crate::metrics::{self, Metered};
use anyhow::Result;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, Path, Request, State,
    },
    http::{
        header::{ORIGIN, USER_AGENT},
        HeaderMap, StatusCode,
    },
    middleware::{self as http_middleware, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gatehouse_core::{attach, Hub, HubError, HubHandle, Registration};
use gatehouse_protocol::validate_room_id;
use gatehouse_transport::WebSocketTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: HubHandle, config: Config) -> Self {
        Self { hub, config }
    }
}

/// A request refused before upgrade.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        error!(error = %e, "Hub unavailable");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    }
}

impl From<WebSocketUpgradeRejection> for ApiError {
    fn from(rejection: WebSocketUpgradeRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error("http");
        let body = Json(serde_json::json!({
            "status": "fail",
            "code": self.status.as_u16(),
            "error": { "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (hub, _hub_task) = Hub::spawn(config.hub_config());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_stats_poller(hub.clone(), metrics::STATS_INTERVAL);
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Gatehouse server listening on {}", addr);
    info!("Create a room at ws://{}/v1/rooms", addr);

    serve(listener, Arc::new(AppState::new(hub, config))).await
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/rooms", get(create_room_handler))
        .route("/v1/rooms/:code", get(join_room_handler))
        .route("/health", get(health_handler))
        .layer(http_middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;
    Ok(())
}

/// Log every request.
async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        user_agent = %user_agent,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request"
    );
    response
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let stats = state.hub.stats().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.rooms,
        "members": stats.members
    }))
    .into_response())
}

fn check_origin(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if config.origin_allowed(origin) {
        return Ok(());
    }
    warn!(origin = origin.unwrap_or("-"), "Origin not allowed");
    Err(ApiError::new(StatusCode::FORBIDDEN, "Origin not allowed"))
}

/// Create a room and become its owner.
async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    check_origin(&state.config, &headers)?;
    let ws = ws?;

    let room_id = ids::fresh_room_id(&state.hub, state.config.limits.room_id_space).await?;
    let registration = Registration::owner(room_id, ids::random_username());
    Ok(upgrade(ws, state, registration, addr))
}

/// Join an existing room as a pending member.
async fn join_room_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    check_origin(&state.config, &headers)?;

    validate_room_id(&code).map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;
    if !state.hub.room_exists(code.as_str()).await? {
        debug!(room = %code, "Join for missing room");
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Room not found"));
    }
    let ws = ws?;

    let registration = Registration::joiner(code, ids::random_username());
    Ok(upgrade(ws, state, registration, addr))
}

/// Upgrade and hand the socket to the hub.
fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    registration: Registration,
    addr: SocketAddr,
) -> Response {
    let max_frame_size = state.config.limits.max_frame_size;

    ws.max_message_size(max_frame_size)
        .on_upgrade(move |socket| async move {
            let connection_id = registration.connection_id.clone();
            info!(
                connection = %connection_id,
                room = %registration.room_id,
                username = %registration.username,
                owner = registration.requested_owner,
                "WebSocket connected"
            );

            let transport = Metered::new(
                WebSocketTransport::new(socket, max_frame_size).with_remote_addr(addr.to_string()),
            );
            let options = state.config.connection_options();
            let tasks = match attach(&state.hub, transport, registration, &options).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(connection = %connection_id, error = %e, "Failed to register connection");
                    return;
                }
            };

            let (inbound, outbound) = tokio::join!(tasks.inbound, tasks.outbound);
            debug!(
                connection = %connection_id,
                inbound = ?inbound,
                outbound = ?outbound,
                "WebSocket disconnected"
            );
        })
}
