//! API server: wires routes, middleware, and state into a runnable
//! Axum service.

use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::{middleware as mw, routes, state::AppState};
use crate::config::Config;
use crate::Result;

/// Requests larger than this are rejected with 413 before any handler
/// runs. Charm archives are typically well under a few megabytes;
/// bundles carrying multiple charms' worth of assets can run larger.
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub config: Config,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let config = Config::from_defaults();
        Self {
            bind_addr: format!("{}:{}", config.host, config.port)
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080))),
            config,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let config = Config::from_env();
        Self {
            bind_addr: format!("{}:{}", config.host, config.port)
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080))),
            config,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
    router: Router,
}

impl ApiServer {
    pub fn new(config: ApiConfig) -> Self {
        let state = AppState::with_config(config.config.clone());
        let router = Self::build_router(&state);
        Self {
            config,
            state,
            router,
        }
    }

    pub fn with_state(state: AppState, config: ApiConfig) -> Self {
        let router = Self::build_router(&state);
        Self {
            config,
            state,
            router,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ApiConfig::default())
    }

    fn build_router(state: &AppState) -> Router {
        let api = routes::api_router(state.clone());

        api
            // Error handling outermost: stamps the request id onto error
            // responses that the taxonomy-driven `StoreError` renders.
            .layer(middleware::from_fn(mw::error_handler_middleware))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                mw::cors_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                mw::auth_context_middleware,
            ))
            .layer(middleware::from_fn(mw::request_id_middleware))
            .layer(TraceLayer::new_for_http())
            // Applied last so it runs first: rejects oversized requests
            // before any auth or handler work.
            .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        println!("charmstore listening on {}", self.config.bind_addr);
        println!("  archive:  http://{}/v4/<ref>/archive", self.config.bind_addr);
        println!("  debug:    http://{}/v4/debug/status", self.config.bind_addr);

        axum::serve(listener, self.router).await?;
        Ok(())
    }

    pub async fn run_until<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        println!("charmstore listening on {}", self.config.bind_addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        println!("charmstore shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn debug_status_endpoint_is_reachable() {
        let server = ApiServer::with_defaults();
        let router = server.router();

        let request = Request::builder()
            .uri("/v4/debug/status")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_request_body_is_rejected() {
        let server = ApiServer::with_defaults();
        let router = server.router();

        let oversized = vec![b'x'; MAX_BODY_SIZE + 1];
        let request = Request::builder()
            .method("PUT")
            .uri("/v4/stats/update")
            .header("content-type", "application/json")
            .header("content-length", oversized.len().to_string())
            .body(Body::from(oversized))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn request_id_header_is_stamped_on_response() {
        let server = ApiServer::with_defaults();
        let router = server.router();

        let request = Request::builder()
            .uri("/v4/debug/status")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }
}
