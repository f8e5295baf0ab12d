pub mod api;
pub mod app_state;
pub mod audit;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod identity;
pub mod security;
pub mod storage;
pub mod stream;
pub mod token;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

//
// Re-export
//
pub use api::{log_request_errors, stream_video};
pub use app_state::{AppState, MemoryHandles, Stores};
pub use config::Config;
pub use error::AccessError;

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(30);
const ENTITLEMENT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Build the external (streaming) and internal (operator) routers
pub fn build_routers(state: AppState) -> (Router, Router) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let external_app = Router::new()
        .route("/stream", get(stream_video))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors.clone())
        .layer(Extension(state.clone()));

    let internal_app = Router::new()
        .route("/tokens", post(api::issue_token))
        .route("/audit", get(api::investigate_audit))
        .route("/entitlements/{subject_id}", get(api::inspect_entitlement))
        .route("/health", get(api::health))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state));

    (external_app, internal_app)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config).await?;
    state.limiter.start_prune_task(LIMITER_PRUNE_INTERVAL);
    state.resolver.start_prune_task(ENTITLEMENT_PRUNE_INTERVAL);
    let audit = state.audit.clone();

    let (external_app, internal_app) = build_routers(state);

    let external_addr = format!("0.0.0.0:{}", config.listen_on_port);
    let external_listener = TcpListener::bind(&external_addr).await?;
    info!("External API listening on {external_addr}");

    let internal_addr = format!("0.0.0.0:{}", config.internal_port);
    let internal_listener = TcpListener::bind(&internal_addr).await?;
    info!("Internal API listening on {internal_addr}");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let external = axum::serve(
        external_listener,
        external_app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let internal = axum::serve(internal_listener, internal_app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let served = tokio::try_join!(external.into_future(), internal.into_future());
    shutdown.cancel();

    info!("Servers stopped, flushing audit trail");
    audit.flush().await;

    served?;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
