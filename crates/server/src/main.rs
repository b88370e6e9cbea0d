//! UIDeck Server
//!
//! A UI control bridge: agents speak a JSON-RPC tool protocol on one side,
//! UI clients connect over WebSocket or streamable HTTP on the other, and the
//! hub in between routes correlated commands, snapshots, and waits.

mod agent_rpc;
mod config;
mod http_rpc;
mod hub;
mod logging;
mod namespace;
mod service;
mod tools;
mod wait;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::http_rpc::HttpBridge;
use crate::service::BridgeService;
use crate::tools::ToolCatalog;

/// Shared router state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BridgeService>,
    pub catalog: Arc<ToolCatalog>,
    pub http: Arc<HttpBridge>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();
    cfg.validate()?;

    let _log_guard = logging::init()?;
    info!(
        component = "server",
        event = "server.starting",
        pid = std::process::id(),
        local_only = cfg.local_only,
        require_token = cfg.require_token,
        "Starting UIDeck server"
    );

    let bind = cfg.bind;
    let service = Arc::new(BridgeService::new(cfg));
    let state = AppState {
        catalog: Arc::new(ToolCatalog::new(service.clone())),
        http: Arc::new(HttpBridge::new(service.hub().clone())),
        service,
    };

    let app = Router::new()
        .route("/ui/ws", get(websocket::ws_handler))
        .route(
            "/ui/rpc",
            axum::routing::post(http_rpc::post_handler)
                .get(http_rpc::sse_handler)
                .delete(http_rpc::close_handler),
        )
        .route("/rpc", axum::routing::post(agent_rpc::rpc_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(
        component = "server",
        event = "server.listening",
        bind_address = %bind,
        "Listening for connections"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!(component = "server", event = "server.stopped", "Server stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let interrupt = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = interrupt => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = interrupt.await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
