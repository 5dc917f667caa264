//! HTTP server implementation.

use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::contador::{contador, AppState};
use super::gate::{RateLimitLayer, RequestGate};
use super::openapi::{self, swagger};
use crate::config::{RateLimitSettings, ServerConfig};
use crate::error::{ContagemError, Result};
use crate::ratelimit::RateLimiter;

/// Assemble the routes, with the request gate in front when rate limiting
/// is enabled.
pub fn build_router(
    server: &ServerConfig,
    settings: Arc<RateLimitSettings>,
    limiter: Arc<RateLimiter>,
) -> Router {
    let client_id_header = settings.enabled().then(|| settings.client_id_header());
    let state = AppState::new(&server.counter_message, openapi::document(client_id_header));

    let router = Router::new()
        .route("/contador", get(contador))
        .route("/swagger/v1/swagger.json", get(swagger))
        .with_state(state);

    let router = if settings.enabled() {
        for rule in settings.matcher().rules() {
            info!(
                endpoint = %rule.endpoint(),
                period = %rule.period(),
                limit = rule.limit(),
                "Rate limit rule active"
            );
        }
        let gate = RequestGate::new(settings, limiter);
        router.layer(RateLimitLayer::new(Arc::new(gate)))
    } else {
        info!("Rate limiting disabled");
        router
    };

    router.layer(TraceLayer::new_for_http())
}

/// HTTP server for the counter service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "Starting HTTP server");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                ContagemError::Io(e)
            })
    }
}
