//! `ParleyServer`: Axum HTTP + WebSocket server on a single port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use parley_auth::{IdentityVerifier, TokenIssuer};
use parley_settings::ServerSettings;
use parley_store::{Database, MessageRepo, UserRepo};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::lifecycle::{run_connection, LifecycleContext};
use crate::registry::ConnectionRegistry;
use crate::router::DeliveryRouter;
use crate::shutdown::ShutdownCoordinator;

/// Shared state handed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub router: DeliveryRouter,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub issuer: Arc<TokenIssuer>,
    pub users: Arc<UserRepo>,
    pub messages: Arc<MessageRepo>,
    pub lifecycle: LifecycleContext,
    pub max_message_size: usize,
    pub start_time: Instant,
}

pub struct ParleyServer {
    settings: ServerSettings,
    state: AppState,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ParleyServer {
    pub fn new(
        settings: ServerSettings,
        db: Database,
        issuer: TokenIssuer,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = DeliveryRouter::new(registry.clone());
        let shutdown = Arc::new(ShutdownCoordinator::new());

        let lifecycle = LifecycleContext {
            router: router.clone(),
            verifier: verifier.clone(),
            max_send_queue: settings.max_send_queue,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(settings.heartbeat_timeout_secs),
            shutdown: shutdown.token(),
        };

        let state = AppState {
            router,
            verifier,
            issuer: Arc::new(issuer),
            users: Arc::new(UserRepo::new(db.clone())),
            messages: Arc::new(MessageRepo::new(db)),
            lifecycle,
            max_message_size: settings.max_message_size,
            start_time: Instant::now(),
        };

        Self {
            settings,
            state,
            registry,
            shutdown,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/api/login", post(api::login))
            .route("/api/users", get(api::list_users))
            .route("/api/messages", post(api::send_message))
            .route("/api/messages/{contact_id}", get(api::conversation))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener and serve in the background until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(addr = %local_addr, "parley listening");
        Ok((local_addr, handle))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.lifecycle.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_connection(socket, ctx))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let online = state.router.registry().len();
    Json(health::health_check(state.start_time, online))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use parley_auth::{JwtKeys, JwtVerifier};
    use parley_core::UserId;
    use tower::ServiceExt;

    fn make_server() -> (ParleyServer, TokenIssuer) {
        let db = Database::in_memory().unwrap();
        UserRepo::new(db.clone()).seed_demo_users().unwrap();
        let keys = JwtKeys::from_secret("server-test");
        let issuer = TokenIssuer::new(keys.clone(), Duration::from_secs(900));
        let server = ParleyServer::new(
            ServerSettings::default(),
            db,
            issuer.clone(),
            Arc::new(JwtVerifier::new(keys)),
        );
        (server, issuer)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (server, _) = make_server();
        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["online_users"], 0);
    }

    #[tokio::test]
    async fn login_issues_token() {
        let (server, _) = make_server();
        let request = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"usuario1","password":"123456"}"#))
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["token"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (server, _) = make_server();
        let request = Request::post("/api/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"usuario1","password":"nope"}"#))
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn users_requires_bearer() {
        let (server, _) = make_server();
        let response = server
            .router()
            .oneshot(Request::get("/api/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn send_validates_body_and_receiver() {
        let (server, issuer) = make_server();
        let token = issuer.issue(UserId::new(1), "usuario1").unwrap();
        let send = |body: &'static str| {
            Request::post("/api/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from(body))
                .unwrap()
        };

        let empty = server.router().oneshot(send(r#"{"receiver_id":2,"message":"  "}"#)).await.unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let unknown = server.router().oneshot(send(r#"{"receiver_id":99,"message":"hi"}"#)).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let ok = server.router().oneshot(send(r#"{"receiver_id":2,"message":"hi"}"#)).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let json = body_json(ok).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["message"]["sender_id"], 1);
    }

    #[test]
    fn new_server_has_empty_registry() {
        let (server, _) = make_server();
        assert!(server.registry().is_empty());
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.settings().port, 4001);
    }
}
