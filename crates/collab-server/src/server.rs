//! `CollabServer`: axum HTTP + WebSocket surface for the hub.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use collab_core::UserIdentity;
use collab_settings::HubSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{AuthError, TokenVerifier, extract_token};
use crate::dispatch::{Dispatcher, HubContext};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat::run_idle_sweep;
use crate::websocket::session::{SessionLimits, run_ws_session};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    ctx: Arc<HubContext>,
    dispatcher: Arc<Dispatcher>,
    verifier: Option<Arc<TokenVerifier>>,
    auth_required: bool,
    limits: SessionLimits,
    max_message_bytes: usize,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

/// The collaboration hub server.
pub struct CollabServer {
    settings: HubSettings,
    ctx: Arc<HubContext>,
    dispatcher: Arc<Dispatcher>,
    verifier: Option<Arc<TokenVerifier>>,
    shutdown: ShutdownCoordinator,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl CollabServer {
    /// Create a server with every built-in handler registered.
    pub fn new(settings: HubSettings, ctx: HubContext) -> Self {
        let dispatcher =
            Dispatcher::with_default_handlers(settings.websocket.handler_timeout());
        let verifier = (!settings.auth.jwt_secret.is_empty())
            .then(|| Arc::new(TokenVerifier::new(&settings.auth.jwt_secret)));
        Self {
            settings,
            ctx: Arc::new(ctx),
            dispatcher: Arc::new(dispatcher),
            verifier,
            shutdown: ShutdownCoordinator::new(),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Replace the dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            dispatcher: self.dispatcher.clone(),
            verifier: self.verifier.clone(),
            auth_required: self.settings.auth.required,
            limits: SessionLimits::from(&self.settings),
            max_message_bytes: self.settings.websocket.max_message_bytes,
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(cors_layer(&self.settings.server.allowed_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind, start the idle sweep and serve until shutdown.
    ///
    /// On shutdown every live connection is closed; each session then
    /// tears itself down. Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "collaboration hub listening");

        let sweep = tokio::spawn(run_idle_sweep(
            self.ctx.clone(),
            self.settings.heartbeat.sweep_interval(),
            self.settings.heartbeat.idle_timeout(),
            self.shutdown.token(),
        ));

        let router = self.router();
        let token = self.shutdown.token();
        let connections = self.ctx.connections.clone();
        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                let closed = connections.close_all().await;
                info!(closed, "shutting down, closed live connections");
            };
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(%error, "server error");
            }
            let _ = sweep.await;
        });

        Ok((local_addr, handle))
    }

    /// Shared hub state.
    pub fn context(&self) -> &Arc<HubContext> {
        &self.ctx
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Settings the server was built with.
    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET])
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let identity = match authenticate(&state, query.token.as_deref(), &headers) {
        Ok(identity) => identity,
        Err(err) => {
            warn!(security = true, error = %err, "rejected websocket upgrade");
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    };

    let AppState {
        ctx,
        dispatcher,
        limits,
        max_message_bytes,
        ..
    } = state;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| run_ws_session(socket, identity, ctx, dispatcher, limits))
}

fn authenticate(
    state: &AppState,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<UserIdentity, AuthError> {
    let token = extract_token(query_token, headers);
    match (token, &state.verifier) {
        (Some(token), Some(verifier)) => verifier.verify(&token),
        _ if !state.auth_required => Ok(UserIdentity::guest(format!(
            "guest-{}",
            uuid::Uuid::now_v7()
        ))),
        (None, _) => Err(AuthError::MissingToken),
        (Some(_), None) => Err(AuthError::NotConfigured),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.ctx.connections.count().await;
    let rooms = state.ctx.rooms.room_count().await;
    Json(health::health_check(state.start_time, connections, rooms))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handlers::test_helpers::make_context;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server(required: bool) -> CollabServer {
        let mut settings = HubSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings.auth.jwt_secret = "secret".into();
        settings.auth.required = required;
        CollabServer::new(settings, make_context())
    }

    fn state_of(server: &CollabServer) -> AppState {
        AppState {
            ctx: server.ctx.clone(),
            dispatcher: server.dispatcher.clone(),
            verifier: server.verifier.clone(),
            auth_required: server.settings.auth.required,
            limits: SessionLimits::from(&server.settings),
            max_message_bytes: server.settings.websocket.max_message_bytes,
            metrics: None,
            start_time: server.start_time,
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let server = make_server(true);
        let resp = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["rooms"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server(true);
        let resp = server
            .router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let server = make_server(true);
        let resp = server
            .router()
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn missing_token_rejected_when_required() {
        let server = make_server(true);
        let state = state_of(&server);
        assert!(matches!(
            authenticate(&state, None, &HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn missing_token_is_guest_when_optional() {
        let server = make_server(false);
        let state = state_of(&server);
        let identity = authenticate(&state, None, &HeaderMap::new()).unwrap();
        assert!(identity.user_id.starts_with("guest-"));
        assert!(identity.permissions.is_empty());
    }

    #[test]
    fn bad_token_rejected_even_when_optional() {
        let server = make_server(false);
        let state = state_of(&server);
        assert!(matches!(
            authenticate(&state, Some("garbage"), &HeaderMap::new()),
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn listen_binds_and_shuts_down() {
        let server = make_server(true);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
