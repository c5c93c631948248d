//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health and transform handlers
//! - Wire up middleware (request ID, panic recovery, logging, metrics)
//! - Bind server to listener
//! - Decode batches, invoke the transformation service, encode the result
//! - Drain in-flight requests on stop, abort at the deadline

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::http::request::{track_requests, HEALTH_PATH};
use crate::http::response::{batch_response, ApiError};
use crate::lifecycle::{Shutdown, StopError, Stoppable};
use crate::observability::{Logger, Metrics};
use crate::transform::{EntityCollection, TransformService};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn TransformService>,
    pub logger: Logger,
    pub metrics: Arc<dyn Metrics>,
}

/// Ingress endpoint for a transformation service.
pub struct HttpServer {
    router: Router,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    logger: Logger,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl HttpServer {
    /// Bind `0.0.0.0:port`. Nothing is served until [`HttpServer::start`].
    pub async fn bind(port: u16, state: AppState) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        let local_addr = listener.local_addr()?;
        let logger = state.logger.clone();

        Ok(Self {
            router: Self::build_router(state),
            listener: Some(listener),
            local_addr,
            logger,
            shutdown: Shutdown::new(),
            task: Mutex::new(None),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health))
            .route("/transform", post(transform))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(middleware::from_fn_with_state(state.clone(), track_requests))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
            .with_state(state)
    }

    /// Start serving in a background task.
    pub fn start(&mut self) -> io::Result<()> {
        let Some(listener) = self.listener.take() else {
            return Err(io::Error::other("http server already started"));
        };

        let router = self.router.clone();
        let mut stop_rx = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.recv().await;
                })
                .await
        });
        *self.task.get_mut() = Some(task);

        self.logger
            .in_scope(|| tracing::info!(address = %self.local_addr, "HTTP server starting"));
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Stoppable for HttpServer {
    fn name(&self) -> &str {
        "http server"
    }

    async fn stop(&self, deadline: Instant) -> Result<(), StopError> {
        self.shutdown.trigger();
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };

        match timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => {
                self.logger.in_scope(|| tracing::info!("HTTP server stopped"));
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(StopError::failed(self.name(), e)),
            Ok(Err(e)) => Err(StopError::failed(self.name(), e)),
            Err(_) => {
                task.abort();
                self.logger
                    .in_scope(|| tracing::warn!("HTTP server did not drain before the deadline"));
                Err(StopError::DeadlineExceeded {
                    component: self.name().to_string(),
                })
            }
        }
    }
}

async fn health() -> &'static str {
    "running"
}

async fn transform(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let batch = EntityCollection::from_slice(&body)?;
    let transformed = state.service.transform(batch).await.map_err(|e| {
        state
            .logger
            .in_scope(|| tracing::warn!(kind = %e.kind(), error = %e, "Transform failed"));
        ApiError::from(e)
    })?;
    Ok(batch_response(&transformed))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}
