//! HTTP transport for the dispatcher.
//!
//! # Endpoints
//!
//! - `POST /query`, `POST /query/` - Accepts a pipeline event, evaluates its
//!   current step and forwards it. Any other method returns 405.
//! - `/health` - Returns 200 if the server is running.

use std::future::{Future, IntoFuture};
use std::pin::pin;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::types::PipelineEvent;

/// Errors that can occur when accepting an event.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        match self {
            QueryError::InvalidJson(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/query", post(query_handler).fallback(method_not_allowed))
        .route("/query/", post(query_handler).fallback(method_not_allowed))
        .route("/health", any(health_handler))
        .with_state(dispatcher)
}

/// Event intake.
///
/// The response does not depend on the dispatch outcome; failures are
/// reported to the run's error URL instead.
pub async fn query_handler(
    State(dispatcher): State<Dispatcher>,
    body: Bytes,
) -> Result<StatusCode, QueryError> {
    let event: PipelineEvent = serde_json::from_slice(&body).inspect_err(|err| {
        warn!(error = %err, "failed to decode pipeline event");
    })?;

    dispatcher.handle(event).await;
    Ok(StatusCode::OK)
}

pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

/// Serve until `shutdown` resolves, then wind down within the dispatcher's
/// shutdown timeout.
///
/// New connections stop being accepted first. Open requests and in-flight
/// work then share one deadline; whatever is still running when it passes
/// is abandoned.
pub async fn serve<F>(listener: TcpListener, dispatcher: Dispatcher, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let timeout = dispatcher.config().shutdown_timeout;
    let (deadline_tx, mut deadline_rx) = oneshot::channel::<Instant>();

    let app = build_router(dispatcher.clone());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = deadline_tx.send(Instant::now() + timeout);
        })
        .into_future();
    let mut server = pin!(server);

    let deadline = tokio::select! {
        result = &mut server => {
            result?;
            let deadline = deadline_rx.await.unwrap_or_else(|_| Instant::now() + timeout);
            return finish(&dispatcher, deadline).await;
        }
        deadline = &mut deadline_rx => deadline.unwrap_or_else(|_| Instant::now() + timeout),
    };

    info!(in_flight = dispatcher.in_flight(), "server stopping");
    match tokio::time::timeout_at(deadline, server).await {
        Ok(result) => result?,
        Err(_) => warn!("open requests did not finish before the shutdown deadline"),
    }
    finish(&dispatcher, deadline).await
}

async fn finish(dispatcher: &Dispatcher, deadline: Instant) -> std::io::Result<()> {
    dispatcher.shutdown_by(deadline).await;
    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
