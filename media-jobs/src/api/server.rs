//! HTTP front door for the job service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::Response;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, MakeSpan, OnResponse, TraceLayer};
use tracing::{Level, Span};

use crate::api::routes;
use crate::error::{Error, Result};
use crate::lifecycle::JobLifecycleManager;
use crate::logging::LoggingConfig;
use crate::scheduler::Scheduler;

/// Where and how the job API listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Largest accepted submission body, in bytes.
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12556,
            enable_cors: true,
            body_limit: 1024 * 1024,
        }
    }
}

impl ApiServerConfig {
    fn socket_addr(&self) -> Result<SocketAddr> {
        let raw = format!("{}:{}", self.bind_address, self.port);
        raw.parse()
            .map_err(|e| Error::config(format!("bad listen address {raw}: {e}")))
    }
}

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub lifecycle: Arc<JobLifecycleManager>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(lifecycle: Arc<JobLifecycleManager>) -> Self {
        Self {
            start_time: Instant::now(),
            lifecycle,
            scheduler: None,
            logging_config: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

/// Health probes are polled and stay out of the request log.
fn is_quiet(req: &Request) -> bool {
    req.uri().path().starts_with("/api/health")
}

fn request_span(req: &Request) -> Span {
    if is_quiet(req) {
        return Span::none();
    }
    DefaultMakeSpan::new().level(Level::INFO).make_span(req)
}

fn log_response<B>(res: &Response<B>, latency: Duration, span: &Span) {
    if !span.is_disabled() {
        DefaultOnResponse::new()
            .level(Level::INFO)
            .on_response(res, latency, span);
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit));

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(log_response::<axum::body::Body>),
        )
    }

    /// Serve until the cancel token fires.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "job API accepting requests");

        let stop = self.cancel_token.clone();
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                stop.cancelled().await;
                tracing::info!("job API draining connections");
            })
            .await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address_parses() {
        let config = ApiServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            ..ApiServerConfig::default()
        };
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_bad_listen_address_is_config_error() {
        let config = ApiServerConfig {
            bind_address: "not an address".to_string(),
            ..ApiServerConfig::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_health_requests_are_not_traced() {
        let req = Request::builder()
            .uri("/api/health/live")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(is_quiet(&req));
        let req = Request::builder()
            .uri("/api/jobs")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(!is_quiet(&req));
    }
}
