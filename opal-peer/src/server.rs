//! HTTP server setup

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admin::admin_router;
use crate::routes::peer_router;
use crate::state::{PeerServices, ServiceSignal};
use opal_core::console::LogLevel;

/// Assembles the full node router: peer RPC plus the admin surface.
pub fn create_router(services: Arc<PeerServices>) -> Router {
    let mut router = peer_router(services.clone()).merge(admin_router(services.clone()));
    router = router.layer(TraceLayer::new_for_http());
    if services.config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }
    router
}

/// Runs the node until a stop signal arrives on the service channel.
pub async fn run_server(
    services: Arc<PeerServices>,
    mut signal_rx: mpsc::Receiver<ServiceSignal>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(services.clone());
    let addr: SocketAddr = services.config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(node = %services.node_name(), "peer listening on {}", listener.local_addr()?);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let signal_services = services.clone();
    tokio::spawn(async move {
        let mut shutdown_tx = Some(shutdown_tx);
        while let Some(signal) = signal_rx.recv().await {
            match signal {
                ServiceSignal::Restart => {
                    // The swap into the staged binary is the supervisor's
                    // job; we only report that it was requested.
                    signal_services
                        .console_log(LogLevel::Info, "service restart requested");
                }
                ServiceSignal::Stop => {
                    signal_services.console_log(LogLevel::Info, "service stop requested");
                    if let Some(tx) = shutdown_tx.take() {
                        let _ = tx.send(());
                    }
                }
                ServiceSignal::ReloadDynamic => {
                    if let Err(e) = signal_services.reload_dynamic().await {
                        signal_services.console_log(
                            LogLevel::Warning,
                            format!("dynamic reload failed: {e}"),
                        );
                    }
                }
            }
        }
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;
    Ok(())
}

/// Binds an ephemeral port and serves in the background (for tests).
pub async fn start_background_server(
    services: Arc<PeerServices>,
) -> Result<SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(services);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("server error: {}", e);
        }
    });
    Ok(addr)
}
