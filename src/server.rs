//! HTTP transport for the metrics endpoint.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use crate::error::ExporterError;
use crate::metrics::prom;

/// Create the Axum router serving `registry`.
pub fn create_router(registry: prometheus::Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(registry)
}

/// Runs one collection and renders the text exposition format.
///
/// Collection does blocking I/O, so it runs off the async workers.
async fn metrics_handler(State(registry): State<prometheus::Registry>) -> Response {
    let rendered = tokio::task::spawn_blocking(move || prom::encode_text(&registry)).await;
    match rendered {
        Ok(Ok(body)) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "could not encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "metrics collection task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Liveness probe.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// Serves `registry` on `address` until Ctrl-C.
pub async fn serve(address: SocketAddr, registry: prometheus::Registry) -> Result<(), ExporterError> {
    let listener = TcpListener::bind(address).await?;
    tracing::info!(address = %address, "listening for scrapes on /metrics");

    axum::serve(listener, create_router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
