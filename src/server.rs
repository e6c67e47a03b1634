//! HTTP endpoint serving the exposition to Prometheus.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::registry::{ExporterRegistry, OPENMETRICS_CONTENT_TYPE};

/// State shared by the handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Registry pulled on every metrics request.
    pub registry: Arc<ExporterRegistry>,
    /// Path the exposition is served under.
    pub telemetry_path: String,
}

/// Routes `GET <telemetry_path>` to [`metrics_handler`] and `GET /` to
/// [`landing_handler`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&state.telemetry_path, get(metrics_handler))
        .route("/", get(landing_handler))
        .with_state(state)
}

/// Pull all collectors and answer with the OpenMetrics text exposition.
///
/// Collectors block on their upstream round trips, so encoding runs on the
/// blocking thread pool.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let registry = Arc::clone(&state.registry);
    match tokio::task::spawn_blocking(move || registry.encode_text()).await {
        Ok(Ok(buffer)) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)
            .body(Body::from(buffer))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Ok(Err(err)) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            warn!(error = %err, "metrics encoding task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Minimal HTML page linking to the metrics.
pub async fn landing_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Elasticsearch Tasks Exporter</title></head>\n\
         <body>\n\
         <h1>Elasticsearch Tasks Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.telemetry_path
    ))
}

/// Serve `router` on `address` until Ctrl-C or SIGTERM.
pub async fn serve(address: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
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

    info!("shutting down");
}
